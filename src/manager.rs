//! Storage Manager facade (spec §4.7): composes the registry, lifecycle,
//! selector, router, and health monitor behind block-level methods plus
//! status/reconfiguration. Deliberately does not implement [`Backend`]
//! itself — see [`ManagerBackendAdapter`] for the thin adapter spec §4.7 and
//! SPEC_FULL.md §3.2 call for instead.

use crate::backend::{self, Backend, BackendRegistry, BackendSelector, HealthStatus, OpContext, SelectionCriteria};
use crate::block::{Block, BlockAddress};
use crate::config::{BackendConfig, StorageConfig};
use crate::error::{ErrorKind, Result, StorageError};
use crate::health::{HealthMonitor, ManagerStatus};
use crate::router::StorageRouter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LifecycleState {
    Fresh = 0,
    Started = 1,
    Stopped = 2,
}

/// Composes the §4.1–§4.6 building blocks into the single entry point callers
/// use (spec §4.7). Lifecycle: `fresh -> started -> stopped` (spec §3).
pub struct StorageManager {
    config: StorageConfig,
    registry: Arc<BackendRegistry>,
    selector: Arc<BackendSelector>,
    router: StorageRouter,
    health: Arc<HealthMonitor>,
    state: AtomicU8,
}

impl StorageManager {
    /// Validates `config` and assembles an empty, unstarted manager. Callers
    /// register concrete backend instances with [`Self::register_backend`]
    /// before calling [`Self::start`] — constructing those instances from
    /// `config.backends` entries is a backend-plugin concern outside this
    /// crate's scope (spec §1 Non-goals: concrete backend wire protocols).
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(BackendRegistry::new());
        let selector = Arc::new(BackendSelector::new());
        let router = StorageRouter::new(Arc::clone(&registry), Arc::clone(&selector));
        router.set_default_backend(config.default_backend.clone());

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            config.health_check_interval(),
            config.health_check_timeout(),
        ));

        Ok(Self {
            config,
            registry,
            selector,
            router,
            health,
            state: AtomicU8::new(LifecycleState::Fresh as u8),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Registers a backend instance and its priority ahead of `start`
    /// connecting it. Safe to call again on an already-started manager to
    /// add a backend that was not present at construction time.
    pub async fn register_backend(&self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        let name = name.into();
        if let Some(cfg) = self.config.backends.get(&name) {
            self.selector.set_priority(&name, cfg.priority);
        }
        self.registry.add(name, backend).await;
    }

    fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::SeqCst) {
            0 => LifecycleState::Fresh,
            1 => LifecycleState::Started,
            _ => LifecycleState::Stopped,
        }
    }

    /// Idempotent-fail: a second `start` call on an already-started manager
    /// returns an error rather than silently succeeding (spec §3 Lifecycle).
    pub async fn start(&self, ctx: &OpContext) -> Result<()> {
        if self.state() == LifecycleState::Started {
            return Err(StorageError::operation(ErrorKind::InvalidRequest, "start", "storage manager already started"));
        }

        let outcome = match backend::connect_all(&self.registry, ctx, false).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "connect_all reported no usable backends");
                backend::LifecycleOutcome::default()
            }
        };
        if !outcome.failed.is_empty() {
            tracing::warn!(failed = outcome.failed.len(), "some backends failed to connect during start");
        }

        self.health.start().await;
        self.state.store(LifecycleState::Started as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent-ok: stopping a manager that is not started is a no-op.
    /// Cancels the health monitor before disconnecting backends
    /// (SPEC_FULL.md §3.3 graceful shutdown ordering).
    pub async fn stop(&self, ctx: &OpContext) -> Result<()> {
        if self.state() != LifecycleState::Started {
            self.state.store(LifecycleState::Stopped as u8, Ordering::SeqCst);
            return Ok(());
        }

        self.health.stop().await;
        let outcome = backend::disconnect_all(&self.registry, ctx).await;
        if !outcome.failed.is_empty() {
            tracing::warn!(failed = outcome.failed.len(), "some backends failed to disconnect during stop");
        }

        self.state.store(LifecycleState::Stopped as u8, Ordering::SeqCst);
        Ok(())
    }

    pub async fn status(&self) -> ManagerStatus {
        self.health.status().await
    }

    pub async fn put(&self, ctx: &OpContext, block: &Block) -> Result<BlockAddress> {
        self.router.put(ctx, block).await
    }

    pub async fn get(&self, ctx: &OpContext, address: &BlockAddress) -> Result<Block> {
        self.router.get(ctx, address).await
    }

    pub async fn has(&self, ctx: &OpContext, address: &BlockAddress) -> Result<bool> {
        self.router.has(ctx, address).await
    }

    pub async fn delete(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.router.delete(ctx, address).await
    }

    pub async fn pin(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.router.pin(ctx, address).await
    }

    pub async fn unpin(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.router.unpin(ctx, address).await
    }

    /// Validates `new_config`, disconnects the old backend, swaps in
    /// `new_backend`, connects it, and updates its selector priority — all
    /// serialized by the registry's single write-lock hold so concurrent
    /// readers never observe the backend missing (spec §4.7).
    pub async fn reconfigure_backend(
        &self,
        ctx: &OpContext,
        name: &str,
        new_config: BackendConfig,
        new_backend: Arc<dyn Backend>,
    ) -> Result<()> {
        if let Some(retry) = &new_config.retry {
            if retry.multiplier < 1.0 {
                return Err(StorageError::Configuration(format!("backend '{}' retry.multiplier must be >= 1.0", name)));
            }
        }

        new_backend.connect(ctx).await?;
        self.registry.replace(name, Arc::clone(&new_backend), ctx).await;
        self.selector.set_priority(name, new_config.priority);
        Ok(())
    }
}

/// Thin [`Backend`]-shaped handle over a [`StorageManager`], scoped to one
/// named backend, for callers that need a `Backend` trait object rather than
/// the manager's own API (SPEC_FULL.md §3.2; spec §4.7 anti-pattern note:
/// "StorageManager must not implement Backend itself").
pub struct ManagerBackendAdapter {
    manager: Arc<StorageManager>,
    backend_name: String,
    connected: std::sync::atomic::AtomicBool,
}

impl ManagerBackendAdapter {
    pub fn new(manager: Arc<StorageManager>, backend_name: impl Into<String>) -> Self {
        Self {
            manager,
            backend_name: backend_name.into(),
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn scoped(&self) -> Result<Arc<dyn Backend>> {
        self.manager
            .registry
            .get(&self.backend_name)
            .await
            .ok_or_else(|| StorageError::BackendNotFound { backend: self.backend_name.clone() })
    }
}

#[async_trait]
impl Backend for ManagerBackendAdapter {
    async fn put(&self, ctx: &OpContext, block: &Block) -> Result<BlockAddress> {
        self.scoped().await?.put(ctx, block).await
    }

    async fn get(&self, ctx: &OpContext, address: &BlockAddress) -> Result<Block> {
        self.scoped().await?.get(ctx, address).await
    }

    async fn has(&self, ctx: &OpContext, address: &BlockAddress) -> Result<bool> {
        self.scoped().await?.has(ctx, address).await
    }

    async fn delete(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        self.scoped().await?.delete(ctx, address).await
    }

    fn info(&self) -> crate::block::BackendInfo {
        // Synchronous trait method over an async lookup: best-effort, falls
        // back to an offline-shaped info record when the backend can't be
        // resolved without blocking.
        crate::block::BackendInfo {
            name: self.backend_name.clone(),
            type_tag: "manager-adapter".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: std::collections::HashSet::new(),
            config: serde_json::Value::Null,
        }
    }

    async fn health(&self, ctx: &OpContext) -> Result<HealthStatus> {
        self.scoped().await?.health(ctx).await
    }

    async fn connect(&self, ctx: &OpContext) -> Result<()> {
        let result = self.scoped().await?.connect(ctx).await;
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    async fn disconnect(&self, ctx: &OpContext) -> Result<()> {
        let result = self.scoped().await?.disconnect(ctx).await;
        self.connected.store(false, Ordering::SeqCst);
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::{ConnectionConfig, DistributionConfig, HealthCheckConfig};
    use std::collections::HashMap;

    fn test_config() -> StorageConfig {
        let mut backends = HashMap::new();
        backends.insert(
            "mock1".to_string(),
            BackendConfig {
                backend_type: "mock".to_string(),
                enabled: true,
                priority: 100,
                connection: ConnectionConfig { endpoint: "mem://mock1".to_string(), connect_timeout_ms: 1000 },
                retry: None,
                timeouts: None,
            },
        );
        StorageConfig {
            default_backend: "mock1".to_string(),
            backends,
            distribution: DistributionConfig { strategy: "single".to_string() },
            health_check: HealthCheckConfig { enabled: true, interval_ms: 200, timeout_ms: 50 },
            performance: Default::default(),
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_fail() {
        let manager = StorageManager::new(test_config()).unwrap();
        manager.register_backend("mock1", Arc::new(MockBackend::new("mock1"))).await;

        let ctx = OpContext::new();
        manager.start(&ctx).await.unwrap();
        let err = manager.start(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn stop_is_idempotent_ok() {
        let manager = StorageManager::new(test_config()).unwrap();
        manager.register_backend("mock1", Arc::new(MockBackend::new("mock1"))).await;

        let ctx = OpContext::new();
        manager.start(&ctx).await.unwrap();
        manager.stop(&ctx).await.unwrap();
        manager.stop(&ctx).await.unwrap(); // second Stop does not error
    }

    #[tokio::test]
    async fn put_get_roundtrip_through_manager() {
        let manager = StorageManager::new(test_config()).unwrap();
        manager.register_backend("mock1", Arc::new(MockBackend::new("mock1"))).await;
        manager.selector_set_priority_for_tests("mock1", 100);

        let ctx = OpContext::new();
        manager.start(&ctx).await.unwrap();

        let block = Block::new(b"payload".to_vec());
        let addr = manager.put(&ctx, &block).await.unwrap();
        let fetched = manager.get(&ctx, &addr).await.unwrap();
        assert_eq!(fetched.data(), block.data());
    }

    #[tokio::test]
    async fn reconfigure_backend_swaps_in_new_instance() {
        let manager = StorageManager::new(test_config()).unwrap();
        let ctx = OpContext::new();
        let old = Arc::new(MockBackend::new("mock1"));
        manager.register_backend("mock1", old.clone()).await;
        manager.start(&ctx).await.unwrap();

        let new_backend = Arc::new(MockBackend::new("mock1-v2"));
        let new_config = test_config().backends.get("mock1").unwrap().clone();
        manager.reconfigure_backend(&ctx, "mock1", new_config, new_backend.clone()).await.unwrap();

        assert!(new_backend.is_connected());
        assert!(!old.is_connected());
    }

    impl StorageManager {
        fn selector_set_priority_for_tests(&self, name: &str, priority: u32) {
            self.selector.set_priority(name, priority);
        }
    }

    #[tokio::test]
    async fn adapter_is_connected_tracks_connect_and_disconnect() {
        let manager = Arc::new(StorageManager::new(test_config()).unwrap());
        manager.register_backend("mock1", Arc::new(MockBackend::new("mock1"))).await;

        let ctx = OpContext::new();
        let adapter = ManagerBackendAdapter::new(Arc::clone(&manager), "mock1");
        assert!(!adapter.is_connected());

        adapter.connect(&ctx).await.unwrap();
        assert!(adapter.is_connected());

        adapter.disconnect(&ctx).await.unwrap();
        assert!(!adapter.is_connected());
    }
}
