//! NoiseFS storage core: a pluggable, multi-backend content-addressed
//! block storage orchestration layer, with a resilience wrapper, an
//! asynchronous indexing/search pipeline, and an encrypted directory
//! manifest manager.

pub mod backend;
pub mod block;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod indexing;
pub mod manager;
pub mod resilience;
pub mod router;

pub use block::{Block, BlockAddress};
pub use config::{SearchConfig, StorageConfig};
pub use error::{ErrorKind, Result, StorageError};
pub use manager::StorageManager;
