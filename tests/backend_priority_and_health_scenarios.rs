// Backend selection and health-aggregation scenario: two backends ranked
// by priority, then one marked unhealthy to exercise the manager's
// degraded system-health projection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use noisefs_storage_core::backend::mock::MockBackend;
use noisefs_storage_core::backend::{BackendRegistry, BackendSelector, OpContext, SelectionCriteria};
use noisefs_storage_core::config::{
    BackendConfig, ConnectionConfig, DistributionConfig, HealthCheckConfig, PerformanceConfig, StorageConfig,
};
use noisefs_storage_core::health::SystemHealth;
use noisefs_storage_core::manager::StorageManager;

mod common;

fn backend_config(priority: u32) -> BackendConfig {
    BackendConfig {
        backend_type: "mock".to_string(),
        enabled: true,
        priority,
        connection: ConnectionConfig { endpoint: "mem://mock".to_string(), connect_timeout_ms: 1000 },
        retry: None,
        timeouts: None,
    }
}

fn two_backend_config() -> StorageConfig {
    let mut backends = HashMap::new();
    backends.insert("mock1".to_string(), backend_config(100));
    backends.insert("mock2".to_string(), backend_config(90));

    StorageConfig {
        default_backend: "mock1".to_string(),
        backends,
        distribution: DistributionConfig { strategy: "single".to_string() },
        health_check: HealthCheckConfig { enabled: true, interval_ms: 30, timeout_ms: 10 },
        performance: PerformanceConfig::default(),
    }
}

#[tokio::test]
async fn higher_priority_backend_is_selected_first_when_both_healthy() {
    common::init_tracing();
    let registry = BackendRegistry::new();
    let selector = BackendSelector::new();
    selector.set_priority("mock1", 100);
    selector.set_priority("mock2", 90);

    let ctx = OpContext::new();
    let mock1 = Arc::new(MockBackend::new("mock1").with_priority(100));
    let mock2 = Arc::new(MockBackend::new("mock2").with_priority(90));
    mock1.connect(&ctx).await.unwrap();
    mock2.connect(&ctx).await.unwrap();
    registry.add("mock1", mock1).await;
    registry.add("mock2", mock2).await;

    let criteria = SelectionCriteria::write_default();
    let ranked = selector.get_backends_by_priority(&registry, &ctx, &criteria).await.unwrap();
    let names: Vec<_> = ranked.iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(names, vec!["mock1".to_string(), "mock2".to_string()]);
}

#[tokio::test]
async fn marking_one_backend_unhealthy_degrades_system_health() {
    let manager = StorageManager::new(two_backend_config()).unwrap();
    let mock1 = Arc::new(MockBackend::new("mock1").with_priority(100));
    let mock2 = Arc::new(MockBackend::new("mock2").with_priority(90));
    manager.register_backend("mock1", mock1.clone()).await;
    manager.register_backend("mock2", mock2.clone()).await;

    let ctx = OpContext::new();
    manager.start(&ctx).await.unwrap();

    // Let the health monitor tick at least once while both are healthy.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = manager.status().await;
    assert_eq!(status.healthy_backends, 2);
    assert_eq!(status.system_health(), SystemHealth::Healthy);

    mock2.set_healthy(false);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = manager.status().await;
    assert_eq!(status.active_backends, 2);
    assert_eq!(status.healthy_backends, 1);
    assert_eq!(status.system_health(), SystemHealth::Degraded);

    manager.stop(&ctx).await.unwrap();
}
