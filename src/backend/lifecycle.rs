//! Connect/disconnect orchestration across the registry (spec §4.3).

use super::{registry::BackendRegistry, OpContext};
use crate::error::{ErrorKind, StorageError};

/// Result of a bulk connect/disconnect sweep: every backend is attempted,
/// errors are collected rather than short-circuiting.
#[derive(Debug, Default)]
pub struct LifecycleOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, StorageError)>,
}

impl LifecycleOutcome {
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn any_failed(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Fold this outcome into a single `StorageError::Aggregate`, if any
    /// backend failed.
    pub fn into_aggregate_error(self) -> Option<StorageError> {
        if self.failed.is_empty() {
            return None;
        }
        let outcomes = self
            .failed
            .into_iter()
            .map(|(name, err)| (name, err.kind()))
            .collect();
        Some(crate::error::aggregate(outcomes))
    }
}

/// Call `connect` on every registered backend without short-circuiting.
///
/// If `require_all` is set, returns an error when any backend failed to
/// connect. Otherwise the caller proceeds with whatever subset connected
/// (spec §4.3: "the lifecycle reports the error set but the manager proceeds
/// with the connected subset").
pub async fn connect_all(
    registry: &BackendRegistry,
    ctx: &OpContext,
    require_all: bool,
) -> Result<LifecycleOutcome, StorageError> {
    let backends = registry.all().await;
    if backends.is_empty() {
        return Err(StorageError::operation(
            ErrorKind::NoBackends,
            "connect_all",
            "no backends registered",
        ));
    }

    let mut outcome = LifecycleOutcome::default();
    for (name, backend) in backends {
        match backend.connect(ctx).await {
            Ok(()) => outcome.succeeded.push(name),
            Err(err) => outcome.failed.push((name, err)),
        }
    }

    if outcome.all_failed() || (require_all && outcome.any_failed()) {
        // Reachable only when `failed` is non-empty, so this always yields Some.
        return Err(outcome.into_aggregate_error().expect("failure recorded above"));
    }

    Ok(outcome)
}

/// Call `disconnect` on every registered backend, always attempting every one
/// regardless of individual failures (spec §4.3).
pub async fn disconnect_all(registry: &BackendRegistry, ctx: &OpContext) -> LifecycleOutcome {
    let mut outcome = LifecycleOutcome::default();

    for (name, backend) in registry.all().await {
        match backend.disconnect(ctx).await {
            Ok(()) => outcome.succeeded.push(name),
            Err(err) => outcome.failed.push((name, err)),
        }
    }

    outcome
}
