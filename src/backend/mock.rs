//! An in-process mock [`Backend`], used only by this crate's own test suite.
//! Mirrors the shape of the pack's mock backend collaborators referenced in
//! spec §1 ("out of scope ... the test mock infrastructure"); this crate
//! defines only the minimal mock it needs to exercise the real contract.

use super::{Backend, BackendInfo, HealthLabel, HealthStatus, OpContext};
use crate::block::{Block, BlockAddress, Capability};
use crate::error::{ErrorKind, Result, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct MockBackend {
    name: String,
    type_tag: String,
    priority: u32,
    capabilities: HashSet<Capability>,
    connected: AtomicBool,
    store: RwLock<HashMap<String, Vec<u8>>>,
    pinned: RwLock<HashSet<String>>,
    fail_next: RwLock<Option<String>>,
    latency_ms: RwLock<u64>,
    healthy: AtomicBool,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: "mock".to_string(),
            priority: 0,
            capabilities: [Capability::ContentAddressing, Capability::Batch].into_iter().collect(),
            connected: AtomicBool::new(false),
            store: RwLock::new(HashMap::new()),
            pinned: RwLock::new(HashSet::new()),
            fail_next: RwLock::new(None),
            latency_ms: RwLock::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.capabilities.insert(cap);
        self
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Make the next data-method call fail with the given opaque message,
    /// exercising the classifier at the call site.
    pub fn fail_next_with(&self, message: impl Into<String>) {
        *self.fail_next.write() = Some(message.into());
    }

    pub fn set_latency_ms(&self, ms: u64) {
        *self.latency_ms.write() = ms;
    }

    /// Flip the backend's reported health without disconnecting it, so
    /// tests can exercise a connected-but-unhealthy state distinct from
    /// offline (spec §4.6 health aggregation).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn maybe_fail(&self, operation: &str) -> Result<()> {
        let mut fail = self.fail_next.write();
        if let Some(message) = fail.take() {
            let kind = crate::error::classify(&message);
            return Err(StorageError::operation(kind, operation, message));
        }
        Ok(())
    }

    fn require_connected(&self, operation: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(StorageError::operation(
                ErrorKind::ConnectionFailed,
                operation,
                "backend is disconnected",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn put(&self, _ctx: &OpContext, block: &Block) -> Result<BlockAddress> {
        self.require_connected("put")?;
        self.maybe_fail("put")?;
        self.store.write().insert(block.id().to_string(), block.data().to_vec());
        Ok(BlockAddress::new(block.id(), &self.type_tag).with_size(block.size() as u64))
    }

    async fn get(&self, _ctx: &OpContext, address: &BlockAddress) -> Result<Block> {
        self.require_connected("get")?;
        self.maybe_fail("get")?;
        match self.store.read().get(&address.id) {
            Some(data) => Ok(Block::with_id(data.clone(), address.id.clone())),
            None => Err(StorageError::not_found("get", format!("block {} not found", address.id))),
        }
    }

    async fn has(&self, _ctx: &OpContext, address: &BlockAddress) -> Result<bool> {
        self.require_connected("has")?;
        Ok(self.store.read().contains_key(&address.id))
    }

    async fn delete(&self, _ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.require_connected("delete")?;
        self.maybe_fail("delete")?;
        self.store.write().remove(&address.id);
        self.pinned.write().remove(&address.id);
        Ok(())
    }

    async fn pin(&self, _ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        if !self.capabilities.contains(&Capability::Pinning) {
            return Ok(());
        }
        self.pinned.write().insert(address.id.clone());
        Ok(())
    }

    async fn unpin(&self, _ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.pinned.write().remove(&address.id);
        Ok(())
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name.clone(),
            type_tag: self.type_tag.clone(),
            version: "mock-1.0".to_string(),
            capabilities: self.capabilities.clone(),
            config: serde_json::json!({ "priority": self.priority }),
        }
    }

    async fn health(&self, _ctx: &OpContext) -> Result<HealthStatus> {
        if !self.is_connected() {
            return Ok(HealthStatus::offline());
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Ok(HealthStatus {
                healthy: false,
                status: HealthLabel::Unhealthy,
                latency: std::time::Duration::from_millis(*self.latency_ms.read()),
                error_rate: 1.0,
                last_check: std::time::SystemTime::now(),
                issues: vec![super::HealthIssue {
                    severity: super::IssueSeverity::Error,
                    code: "mock-forced-unhealthy".to_string(),
                    description: "backend marked unhealthy for testing".to_string(),
                    timestamp: std::time::SystemTime::now(),
                }],
            });
        }
        let mut status = HealthStatus::healthy();
        status.latency = std::time::Duration::from_millis(*self.latency_ms.read());
        status.status = HealthLabel::Healthy;
        Ok(status)
    }

    async fn connect(&self, _ctx: &OpContext) -> Result<()> {
        self.maybe_fail("connect")?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _ctx: &OpContext) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub fn mock_backend(name: &str) -> Arc<MockBackend> {
    Arc::new(MockBackend::new(name))
}
