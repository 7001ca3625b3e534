//! Core data model: the content-addressed `Block` and its locator, `BlockAddress`.
//!
//! These types are produced by callers and consumed by backends; neither is ever
//! mutated once constructed. See spec §3 DATA MODEL.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// An immutable byte payload with a content-derived identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Vec<u8>,
    id: String,
}

impl Block {
    /// Construct a block from raw bytes, deriving its identifier from the content.
    pub fn new(data: Vec<u8>) -> Self {
        let id = Self::derive_id(&data);
        Self { data, id }
    }

    /// Construct a block with a caller-supplied identifier (e.g. a legacy CID).
    ///
    /// Used only at conversion boundaries; ordinary block production should go
    /// through [`Block::new`] so the identifier always reflects the content.
    pub fn with_id(data: Vec<u8>, id: String) -> Self {
        Self { data, id }
    }

    fn derive_id(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// A locator pairing a content identifier with the backend-type tag that produced
/// it, plus optional size/timestamp metadata. Immutable once returned by a
/// successful `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAddress {
    pub id: String,
    pub backend_type: String,
    pub size: Option<u64>,
    /// Unix epoch milliseconds; `None` when the producing backend did not report one.
    pub timestamp: Option<u64>,
}

impl BlockAddress {
    pub fn new(id: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend_type: backend_type.into(),
            size: None,
            timestamp: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_timestamp_now(mut self) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.timestamp = Some(millis);
        self
    }

    /// Convert a legacy bare CID string into a [`BlockAddress`], assuming the
    /// default backend type tag. Used only at the external boundary described
    /// in spec §9 (legacy-CID conversion).
    pub fn from_legacy_cid(cid: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self::new(cid, backend_type)
    }
}

/// Capability tags drawn from the closed vocabulary in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ContentAddressing,
    Pinning,
    Batch,
    PeerAware,
    Streaming,
    Distributed,
}

/// Static capability descriptor for a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub type_tag: String,
    pub version: String,
    pub capabilities: HashSet<Capability>,
    pub config: serde_json::Value,
}

impl BackendInfo {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_is_content_derived() {
        let a = Block::new(b"hello".to_vec());
        let b = Block::new(b"hello".to_vec());
        assert_eq!(a.id(), b.id());

        let c = Block::new(b"different".to_vec());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn block_address_builders() {
        let addr = BlockAddress::new("Qm123", "mock").with_size(42);
        assert_eq!(addr.size, Some(42));
        assert_eq!(addr.backend_type, "mock");
    }
}
