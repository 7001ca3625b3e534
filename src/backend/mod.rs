//! The Backend contract (spec §4.1) and the per-manager registry that tracks
//! live instances of it (spec §4.2). A process-wide constructor registry was
//! considered and rejected (spec §9 Open Questions; see DESIGN.md).

pub mod lifecycle;
pub mod registry;
pub mod selector;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use crate::block::{BackendInfo, Block, BlockAddress};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use lifecycle::{connect_all, disconnect_all, LifecycleOutcome};
pub use registry::BackendRegistry;
pub use selector::{BackendSelector, OperationHint, SelectionCriteria};

/// Cancellation/deadline context threaded through every suspension point
/// (spec §5 Cancellation and timeouts). `correlation_id` carries a single
/// call's identity across the structured logging fields emitted at each
/// suspension point (SPEC_FULL.md §3.4), the same way a connection pool
/// tags a checkout with an id for the life of one borrow.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub cancel: CancellationToken,
    pub deadline: Option<std::time::Instant>,
    pub correlation_id: Uuid,
}

impl OpContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(std::time::Instant::now() + timeout),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Derive a child context whose deadline is bounded by `timeout`, linked to
    /// this context's cancellation (spec §5: "Timeouts are enforced by the
    /// outermost resilience wrapper by deriving a deadline-bounded token").
    /// The correlation id is inherited so a single logical call keeps one
    /// identity across nested deadline derivations.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = std::time::Instant::now() + timeout;
        let bounded = match self.deadline {
            Some(existing) => deadline.min(existing),
            None => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(bounded),
            correlation_id: self.correlation_id,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| std::time::Instant::now() >= d).unwrap_or(false)
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a backend's health (spec §3 HealthStatus).
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: HealthLabel,
    pub latency: Duration,
    pub error_rate: f64,
    pub last_check: std::time::SystemTime,
    pub issues: Vec<HealthIssue>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            status: HealthLabel::Healthy,
            latency: Duration::from_millis(0),
            error_rate: 0.0,
            last_check: std::time::SystemTime::now(),
            issues: Vec::new(),
        }
    }

    pub fn offline() -> Self {
        Self {
            healthy: false,
            status: HealthLabel::Offline,
            latency: Duration::from_millis(0),
            error_rate: 1.0,
            last_check: std::time::SystemTime::now(),
            issues: vec![HealthIssue {
                severity: IssueSeverity::Critical,
                code: "backend-offline".to_string(),
                description: "backend is not connected".to_string(),
                timestamp: std::time::SystemTime::now(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub description: String,
    pub timestamp: std::time::SystemTime,
}

/// Abstract block store (spec §4.1).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn put(&self, ctx: &OpContext, block: &Block) -> Result<BlockAddress>;
    async fn get(&self, ctx: &OpContext, address: &BlockAddress) -> Result<Block>;
    async fn has(&self, ctx: &OpContext, address: &BlockAddress) -> Result<bool>;
    async fn delete(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()>;

    async fn put_many(&self, ctx: &OpContext, blocks: &[Block]) -> Result<Vec<BlockAddress>> {
        let mut out = Vec::with_capacity(blocks.len());
        for block in blocks {
            out.push(self.put(ctx, block).await?);
        }
        Ok(out)
    }

    async fn get_many(&self, ctx: &OpContext, addresses: &[BlockAddress]) -> Result<Vec<Block>> {
        let mut out = Vec::with_capacity(addresses.len());
        for addr in addresses {
            out.push(self.get(ctx, addr).await?);
        }
        Ok(out)
    }

    /// No-op permissible when the backend lacks [`crate::block::Capability::Pinning`].
    async fn pin(&self, _ctx: &OpContext, _address: &BlockAddress) -> Result<()> {
        Ok(())
    }

    async fn unpin(&self, _ctx: &OpContext, _address: &BlockAddress) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> BackendInfo;
    async fn health(&self, ctx: &OpContext) -> Result<HealthStatus>;

    async fn connect(&self, ctx: &OpContext) -> Result<()>;
    async fn disconnect(&self, ctx: &OpContext) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Extension for backends that can target specific peers (spec §4.1 PeerAware).
/// Detected structurally: a concrete backend additionally implements this trait
/// and the manager downcasts to it rather than relying on a capability flag alone.
#[async_trait]
pub trait PeerAware: Backend {
    async fn get_with_peer_hint(
        &self,
        ctx: &OpContext,
        address: &BlockAddress,
        peers: &[String],
    ) -> Result<Block>;

    async fn broadcast(&self, ctx: &OpContext, address: &BlockAddress, block: &Block) -> Result<()>;

    async fn connected_peers(&self) -> Vec<String>;
}
