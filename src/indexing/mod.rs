//! Asynchronous indexing and search pipeline (spec §4.9).

pub mod document;
pub mod extractor;
pub mod index_store;
pub mod pipeline;
pub mod queue;
pub mod result_cache;
pub mod search;

pub use document::{build_document, ContentProvider, FileIndexLookup, FileLister, FileMetadata, IndexDocument};
pub use extractor::{ContentExtractor, Descriptor, DescriptorCodec};
pub use index_store::{DocumentIndex, StoredDocument};
pub use pipeline::{IndexingMetrics, SearchManager};
pub use queue::{IndexOperation, IndexQueue, IndexRequest};
pub use result_cache::ResultCache;
pub use search::{MetadataFilters, SearchHit, SearchOptions, SearchResults, SizeRange, SortField, SortOrder, TimeRange};
