//! Reusable cache primitives (spec §4.11) shared by the indexing pipeline's
//! result cache and the directory manager's manifest cache.

pub mod lru_ttl;
pub mod write_back;

pub use lru_ttl::LruTtlCache;
pub use write_back::{FlushSink, WriteBackCache, WriteBackStats};
