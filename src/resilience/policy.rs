//! Per-operation-type resilience configuration (spec §4.8).

use super::retry::RetryPolicy;
use crate::backend::OperationHint;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OperationConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub enabled: bool,
}

impl OperationConfig {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            timeout,
            retry,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Holds one [`OperationConfig`] per operation type (spec §4.8: read, write,
/// delete, list, sync, query), falling back to a default when a type has no
/// explicit entry.
pub struct ResiliencePolicy {
    by_operation: HashMap<OperationHint, OperationConfig>,
    default: OperationConfig,
}

impl ResiliencePolicy {
    pub fn new(default: OperationConfig) -> Self {
        Self {
            by_operation: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, hint: OperationHint, config: OperationConfig) {
        self.by_operation.insert(hint, config);
    }

    pub fn for_hint(&self, hint: OperationHint) -> &OperationConfig {
        self.by_operation.get(&hint).unwrap_or(&self.default)
    }
}

impl Default for ResiliencePolicy {
    /// Reads retry harder than writes (idempotent); deletes and syncs don't
    /// retry by default to avoid duplicating side effects (spec §4.8 "Retry
    /// budget is per-operation-invocation, not global").
    fn default() -> Self {
        let read_retry = RetryPolicy::new(Duration::from_millis(50), 2.0, Duration::from_secs(5), 3).with_jitter(true);
        let write_retry = RetryPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(10), 2).with_jitter(true);
        let no_retry = RetryPolicy::new(Duration::from_millis(0), 1.0, Duration::from_millis(0), 0);

        let mut policy = ResiliencePolicy::new(OperationConfig::new(Duration::from_secs(10), read_retry.clone()));
        policy.set(OperationHint::Read, OperationConfig::new(Duration::from_secs(10), read_retry));
        policy.set(OperationHint::Write, OperationConfig::new(Duration::from_secs(15), write_retry));
        policy.set(OperationHint::Delete, OperationConfig::new(Duration::from_secs(10), no_retry.clone()));
        policy.set(OperationHint::Sync, OperationConfig::new(Duration::from_secs(30), no_retry));
        policy.set(
            OperationHint::List,
            OperationConfig::new(Duration::from_secs(10), RetryPolicy::new(Duration::from_millis(50), 2.0, Duration::from_secs(5), 3)),
        );
        policy.set(
            OperationHint::Query,
            OperationConfig::new(Duration::from_secs(10), RetryPolicy::new(Duration::from_millis(50), 2.0, Duration::from_secs(5), 3)),
        );
        policy
    }
}
