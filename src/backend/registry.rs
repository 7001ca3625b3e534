//! Process-wide map name -> Backend with connected/healthy projections
//! (spec §4.2).

use super::{Backend, OpContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mapping name -> Backend. Add/Remove are O(1). The `available`/`healthy`
/// projections are computed on demand against a snapshot: callers see a
/// consistent view even if another task mutates the registry afterwards,
/// because the snapshot is a `Vec` built under a single read lock, not a
/// live iterator.
pub struct BackendRegistry {
    backends: Arc<RwLock<HashMap<String, Arc<dyn Backend>>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a backend under `name`, replacing any previous entry.
    pub async fn add(&self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        let mut backends = self.backends.write().await;
        backends.insert(name.into(), backend);
    }

    /// Remove a backend, disconnecting it first (spec §3 Invariants: "removing
    /// a backend disconnects it first").
    pub async fn remove(&self, name: &str, ctx: &OpContext) -> Option<Arc<dyn Backend>> {
        let backend = {
            let mut backends = self.backends.write().await;
            backends.remove(name)
        };

        if let Some(backend) = &backend {
            let _ = backend.disconnect(ctx).await;
        }

        backend
    }

    /// Atomically swap the backend registered under `name`: the old entry is
    /// disconnected and replaced with `new_backend` under a single write-lock
    /// hold, so readers never observe the name missing or pointing at a
    /// half-connected replacement (spec §4.7 `reconfigure_backend`).
    pub async fn replace(&self, name: &str, new_backend: Arc<dyn Backend>, ctx: &OpContext) {
        let mut backends = self.backends.write().await;
        if let Some(old) = backends.insert(name.to_string(), new_backend) {
            let _ = old.disconnect(ctx).await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        let backends = self.backends.read().await;
        backends.get(name).cloned()
    }

    /// Snapshot of every registered backend, name included.
    pub async fn all(&self) -> Vec<(String, Arc<dyn Backend>)> {
        let backends = self.backends.read().await;
        backends.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Snapshot of backends that are currently connected.
    pub async fn available(&self) -> Vec<(String, Arc<dyn Backend>)> {
        self.all()
            .await
            .into_iter()
            .filter(|(_, b)| b.is_connected())
            .collect()
    }

    /// Snapshot of backends that are connected and healthy.
    pub async fn healthy(&self, ctx: &OpContext) -> Vec<(String, Arc<dyn Backend>)> {
        let mut out = Vec::new();
        for (name, backend) in self.available().await {
            if let Ok(status) = backend.health(ctx).await {
                if status.healthy {
                    out.push((name, backend));
                }
            }
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[tokio::test]
    async fn add_get_remove_roundtrip() {
        let registry = BackendRegistry::new();
        let backend = Arc::new(MockBackend::new("mock1"));
        registry.add("mock1", backend.clone()).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.get("mock1").await.is_some());

        let ctx = OpContext::new();
        registry.remove("mock1", &ctx).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn projections_are_snapshots() {
        let registry = BackendRegistry::new();
        let backend = Arc::new(MockBackend::new("mock1"));
        let ctx = OpContext::new();
        backend.connect(&ctx).await.unwrap();
        registry.add("mock1", backend.clone()).await;

        let snapshot = registry.available().await;
        assert_eq!(snapshot.len(), 1);

        // Mutating the registry after taking the snapshot must not affect it.
        registry.add("mock2", Arc::new(MockBackend::new("mock2"))).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn only_connected_backends_are_available() {
        let registry = BackendRegistry::new();
        registry.add("disconnected", Arc::new(MockBackend::new("disconnected"))).await;

        let connected = Arc::new(MockBackend::new("connected"));
        connected.connect(&OpContext::new()).await.unwrap();
        registry.add("connected", connected).await;

        let available = registry.available().await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].0, "connected");
    }
}
