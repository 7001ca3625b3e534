//! Choose a backend given structured criteria (spec §4.4).

use super::{registry::BackendRegistry, Backend, OpContext};
use crate::block::Capability;
use crate::error::{ErrorKind, Result, StorageError};
use std::sync::Arc;

/// Operation-type hint used by the selector to bias choice (maps onto the
/// resilience layer's closed operation-type set, spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationHint {
    Read,
    Write,
    Delete,
    List,
    Sync,
    Query,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub required_capabilities: Vec<Capability>,
    pub preferred_capabilities: Vec<Capability>,
    pub allowed_types: Vec<String>,
    pub disallowed_types: Vec<String>,
    pub require_healthy: bool,
    pub prefer_high_priority: bool,
    pub prefer_low_latency: bool,
    pub min_available_storage: Option<u64>,
    pub operation_hint: Option<OperationHint>,
    pub block_size: Option<u64>,
    pub exclude: Vec<String>,
}

impl SelectionCriteria {
    pub fn write_default() -> Self {
        Self {
            operation_hint: Some(OperationHint::Write),
            prefer_high_priority: true,
            require_healthy: true,
            ..Default::default()
        }
    }
}

/// Per-backend priority, supplied out-of-band from [`crate::config::BackendConfig`]
/// since it is not observable from the [`Backend`] trait itself.
pub struct BackendSelector {
    priorities: dashmap::DashMap<String, u32>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            priorities: dashmap::DashMap::new(),
        }
    }

    pub fn set_priority(&self, name: impl Into<String>, priority: u32) {
        self.priorities.insert(name.into(), priority);
    }

    pub fn priority_of(&self, name: &str) -> u32 {
        self.priorities.get(name).map(|p| *p).unwrap_or(0)
    }

    /// Run the selection algorithm from spec §4.4 against the registry's
    /// current available backends, returning only the top pick.
    pub async fn select(
        &self,
        registry: &BackendRegistry,
        ctx: &OpContext,
        criteria: &SelectionCriteria,
    ) -> Result<(String, Arc<dyn Backend>)> {
        let ranked = self.get_backends_by_priority(registry, ctx, criteria).await?;
        Ok(ranked.into_iter().next().expect("get_backends_by_priority returns at least one entry or errors"))
    }

    /// Runs the same ranking as [`Self::select`] but returns the full
    /// priority-ordered list of qualifying backends rather than just the
    /// top pick (spec §8 scenario 5 "get_backends_by_priority").
    pub async fn get_backends_by_priority(
        &self,
        registry: &BackendRegistry,
        ctx: &OpContext,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<(String, Arc<dyn Backend>)>> {
        let mut candidates = registry.available().await;

        // Drop excluded backends.
        candidates.retain(|(name, _)| !criteria.exclude.contains(name));

        // Drop backends missing required capabilities or failing type filters.
        let mut filtered = Vec::new();
        for (name, backend) in candidates {
            let info = backend.info();

            if !criteria.allowed_types.is_empty() && !criteria.allowed_types.contains(&info.type_tag) {
                continue;
            }
            if criteria.disallowed_types.contains(&info.type_tag) {
                continue;
            }
            if !criteria
                .required_capabilities
                .iter()
                .all(|cap| info.capabilities.contains(cap))
            {
                continue;
            }

            filtered.push((name, backend));
        }

        // Drop unhealthy backends when required, and collect health for ranking.
        let mut ranked = Vec::new();
        for (name, backend) in filtered {
            let health = backend.health(ctx).await.ok();
            let healthy = health.as_ref().map(|h| h.healthy).unwrap_or(false);

            if criteria.require_healthy && !healthy {
                continue;
            }

            if let Some(floor) = criteria.min_available_storage {
                // Backends that don't report storage figures are treated as
                // satisfying the floor; this is a soft constraint per spec §4.4.
                let available = info_storage_hint(&backend).unwrap_or(floor);
                if available < floor {
                    continue;
                }
            }

            ranked.push((name, backend, healthy, health));
        }

        if ranked.is_empty() {
            return Err(StorageError::operation(
                ErrorKind::NoBackends,
                "select",
                "no backend satisfies the selection criteria",
            ));
        }

        // Priority ordering: healthy ahead of unhealthy, then descending
        // priority, ties broken by descending health (latency as proxy).
        if criteria.prefer_high_priority {
            ranked.sort_by(|a, b| {
                b.2.cmp(&a.2)
                    .then_with(|| self.priority_of(&b.0).cmp(&self.priority_of(&a.0)))
                    .then_with(|| latency_of(&a.3).cmp(&latency_of(&b.3)))
            });
        } else if criteria.prefer_low_latency {
            ranked.sort_by(|a, b| latency_of(&a.3).cmp(&latency_of(&b.3)));
        } else {
            ranked.sort_by(|a, b| b.2.cmp(&a.2));
        }

        Ok(ranked.into_iter().map(|(name, backend, ..)| (name, backend)).collect())
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn latency_of(health: &Option<super::HealthStatus>) -> std::time::Duration {
    health.as_ref().map(|h| h.latency).unwrap_or(std::time::Duration::MAX)
}

fn info_storage_hint(backend: &Arc<dyn Backend>) -> Option<u64> {
    backend
        .info()
        .config
        .get("available_storage")
        .and_then(|v| v.as_u64())
}
