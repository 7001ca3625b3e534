//! Directory Manifest Manager (spec §4.10): encrypted directory-structure
//! storage with an LRU+TTL manifest cache and a cancellable reconstruction
//! protocol.

pub mod manager;
pub mod manifest;

pub use manager::{DirectoryManager, DirectoryManagerMetrics};
pub use manifest::{
    DirectoryManifest, EntryType, ManifestCrypto, ManifestEntry, ReconstructedEntry,
    ReconstructionError, ReconstructionResult, ReconstructionStatus,
};
