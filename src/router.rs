//! Resolve a logical block operation into one or more backend calls
//! (spec §4.5). Single-strategy router: the only distribution strategy is
//! "single" (spec §1 Non-goals, §6 distribution.strategy).

use crate::backend::{BackendRegistry, OpContext, SelectionCriteria};
use crate::block::{Block, BlockAddress};
use crate::error::{self, ErrorKind, Result, StorageError};
use std::sync::Arc;

pub struct StorageRouter {
    registry: Arc<BackendRegistry>,
    selector: Arc<crate::backend::BackendSelector>,
    default_backend: parking_lot::RwLock<Option<String>>,
}

impl StorageRouter {
    pub fn new(registry: Arc<BackendRegistry>, selector: Arc<crate::backend::BackendSelector>) -> Self {
        Self {
            registry,
            selector,
            default_backend: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_default_backend(&self, name: impl Into<String>) {
        *self.default_backend.write() = Some(name.into());
    }

    pub fn default_backend(&self) -> Option<String> {
        self.default_backend.read().clone()
    }

    /// Selects one backend matching write criteria and dispatches.
    pub async fn put(&self, ctx: &OpContext, block: &Block) -> Result<BlockAddress> {
        let criteria = SelectionCriteria::write_default();
        let (name, backend) = self.selector.select(&self.registry, ctx, &criteria).await?;
        backend
            .put(ctx, block)
            .await
            .map_err(|e| reclassify(e, &name, "put"))
    }

    /// Resolves the default backend unless the address names a specific one.
    async fn resolve_for_address(&self, address: &BlockAddress, operation: &str) -> Result<(String, Arc<dyn crate::backend::Backend>)> {
        if let Some(backend) = self.registry.get(&address.backend_type).await {
            return Ok((address.backend_type.clone(), backend));
        }

        let default = self.default_backend().ok_or_else(|| {
            StorageError::operation(ErrorKind::NoBackends, operation, "no default backend configured")
        })?;

        let backend = self
            .registry
            .get(&default)
            .await
            .ok_or_else(|| StorageError::BackendNotFound { backend: default.clone() })?;

        Ok((default, backend))
    }

    pub async fn get(&self, ctx: &OpContext, address: &BlockAddress) -> Result<Block> {
        let (name, backend) = self.resolve_for_address(address, "get").await?;
        backend.get(ctx, address).await.map_err(|e| reclassify(e, &name, "get"))
    }

    pub async fn has(&self, ctx: &OpContext, address: &BlockAddress) -> Result<bool> {
        let (name, backend) = self.resolve_for_address(address, "has").await?;
        backend.has(ctx, address).await.map_err(|e| reclassify(e, &name, "has"))
    }

    /// Attempts deletion on every backend reporting `has = true`. At least one
    /// success is an overall success; all-fail is an error (spec §4.5).
    pub async fn delete(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut outcomes = Vec::new();

        for (name, backend) in self.registry.available().await {
            match backend.has(ctx, address).await {
                Ok(true) => {
                    attempted += 1;
                    match backend.delete(ctx, address).await {
                        Ok(()) => succeeded += 1,
                        Err(e) => outcomes.push((name, e.kind())),
                    }
                }
                _ => continue,
            }
        }

        if attempted == 0 {
            return Err(StorageError::not_found("delete", format!("block {} not present on any backend", address.id)));
        }

        if succeeded > 0 {
            return Ok(());
        }

        Err(error::aggregate(outcomes))
    }

    /// Scoped to backends exposing the pinning capability; no-op elsewhere.
    pub async fn pin(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        let (_, backend) = self.resolve_for_address(address, "pin").await?;
        backend.pin(ctx, address).await
    }

    pub async fn unpin(&self, ctx: &OpContext, address: &BlockAddress) -> Result<()> {
        let (_, backend) = self.resolve_for_address(address, "unpin").await?;
        backend.unpin(ctx, address).await
    }

    /// Parallel scatter, preserving input order in the output array (spec
    /// §4.5: "may be implemented as parallel scatter...or delegate to a
    /// backend-native batch when available"). Fails fast on the first error
    /// encountered while collecting results, same as the sequential form.
    pub async fn put_many(&self, ctx: &OpContext, blocks: &[Block]) -> Result<Vec<BlockAddress>> {
        let futures = blocks.iter().map(|block| self.put(ctx, block));
        futures::future::join_all(futures)
            .await
            .into_iter()
            .collect()
    }

    pub async fn get_many(&self, ctx: &OpContext, addresses: &[BlockAddress]) -> Result<Vec<Block>> {
        let futures = addresses.iter().map(|address| self.get(ctx, address));
        futures::future::join_all(futures)
            .await
            .into_iter()
            .collect()
    }
}

/// Re-classify an error only if it hasn't been classified yet (it's already a
/// `StorageError`, so here that means leaving its kind untouched); this hook
/// exists so future backend implementations returning opaque strings can be
/// routed through [`error::classify`] at this single boundary (spec §7
/// Propagation: "Backend-layer errors pass through the classifier once, near
/// the boundary").
fn reclassify(err: StorageError, _backend_name: &str, _operation: &str) -> StorageError {
    err
}
