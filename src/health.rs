//! Periodic backend health probing and system-health aggregation (spec §4.6).
//!
//! Scoring model adapted from a load-balancer health aggregator,
//! simplified to the closed healthy/degraded/critical aggregation spec §4.6
//! and §8 actually require.

use crate::backend::{Backend, BackendRegistry, HealthStatus, OpContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Critical,
}

impl SystemHealth {
    /// `critical` if zero healthy; `degraded` if some but not all; `healthy`
    /// otherwise (spec §4.6, §8 Health aggregation).
    pub fn aggregate(healthy_backends: usize, active_backends: usize) -> Self {
        if healthy_backends == 0 {
            SystemHealth::Critical
        } else if healthy_backends < active_backends {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerStatus {
    pub started: bool,
    pub total_backends: usize,
    pub active_backends: usize,
    pub healthy_backends: usize,
    pub per_backend: HashMap<String, HealthStatus>,
    pub last_check: Option<std::time::SystemTime>,
}

impl ManagerStatus {
    pub fn system_health(&self) -> SystemHealth {
        SystemHealth::aggregate(self.healthy_backends, self.active_backends)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::offline()
    }
}

/// Periodic probe loop over a [`BackendRegistry`], cancellable via a shared
/// token and stopped by the manager on `Stop` (spec §4.6, §5).
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    interval: Duration,
    probe_timeout: Duration,
    latest: Arc<RwLock<ManagerStatus>>,
    started: Arc<AtomicBool>,
    handle: RwLock<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// `probe_timeout` must be strictly less than `interval` (spec §6 validation).
    pub fn new(registry: Arc<BackendRegistry>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            probe_timeout,
            latest: Arc::new(RwLock::new(ManagerStatus::default())),
            started: Arc::new(AtomicBool::new(false)),
            handle: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn status(&self) -> ManagerStatus {
        self.latest.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the periodic loop. Idempotent: calling `start` while already
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        this.probe_once().await;
                    }
                }
            }
        });

        *self.handle.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.handle.write().await.take() {
            let _ = handle.await;
        }
    }

    async fn probe_once(&self) {
        let ctx = OpContext::with_timeout(self.probe_timeout);
        let backends = self.registry.available().await;

        let mut per_backend = HashMap::new();
        let mut healthy_count = 0;

        for (name, backend) in &backends {
            let status = probe_backend(backend.as_ref(), &ctx, name).await;
            if status.healthy {
                healthy_count += 1;
            }
            per_backend.insert(name.clone(), status);
        }

        let total = self.registry.len().await;
        let mut latest = self.latest.write().await;
        *latest = ManagerStatus {
            started: self.is_running(),
            total_backends: total,
            active_backends: backends.len(),
            healthy_backends: healthy_count,
            per_backend,
            last_check: Some(std::time::SystemTime::now()),
        };

        debug!(
            active = latest.active_backends,
            healthy = latest.healthy_backends,
            total = latest.total_backends,
            "health probe tick complete"
        );
    }
}

async fn probe_backend(backend: &dyn Backend, ctx: &OpContext, name: &str) -> HealthStatus {
    match tokio::time::timeout(ctx.deadline.map(|d| d.saturating_duration_since(std::time::Instant::now())).unwrap_or(Duration::from_secs(5)), backend.health(ctx)).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            warn!(backend_name = name, correlation_id = %ctx.correlation_id, error = %err, "health probe returned an error");
            HealthStatus::offline()
        }
        Err(_) => {
            warn!(backend_name = name, correlation_id = %ctx.correlation_id, "health probe timed out");
            HealthStatus::offline()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[tokio::test]
    async fn aggregation_matches_spec_rules() {
        assert_eq!(SystemHealth::aggregate(0, 3), SystemHealth::Critical);
        assert_eq!(SystemHealth::aggregate(2, 3), SystemHealth::Degraded);
        assert_eq!(SystemHealth::aggregate(3, 3), SystemHealth::Healthy);
        assert_eq!(SystemHealth::aggregate(0, 0), SystemHealth::Critical);
    }

    #[tokio::test]
    async fn probe_once_populates_status() {
        let registry = Arc::new(BackendRegistry::new());
        let backend = Arc::new(MockBackend::new("mock1"));
        backend.connect(&OpContext::new()).await.unwrap();
        registry.add("mock1", backend).await;

        let monitor = Arc::new(HealthMonitor::new(
            registry,
            Duration::from_millis(50),
            Duration::from_millis(10),
        ));
        monitor.probe_once().await;

        let status = monitor.status().await;
        assert_eq!(status.active_backends, 1);
        assert_eq!(status.healthy_backends, 1);
        assert_eq!(status.system_health(), SystemHealth::Healthy);
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let registry = Arc::new(BackendRegistry::new());
        let monitor = Arc::new(HealthMonitor::new(
            registry,
            Duration::from_millis(20),
            Duration::from_millis(5),
        ));

        monitor.start().await;
        monitor.start().await; // no-op, does not spawn a second loop
        assert!(monitor.is_running());

        monitor.stop().await;
        monitor.stop().await; // no-op
        assert!(!monitor.is_running());
    }
}
