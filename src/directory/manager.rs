//! Directory Manager (spec §4.10): encrypted manifest storage backed by the
//! storage manager, an LRU+TTL manifest cache, and a cancellable
//! reconstruction protocol.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::OpContext;
use crate::block::Block;
use crate::cache::LruTtlCache;
use crate::error::{ErrorKind, Result, StorageError};
use crate::manager::StorageManager;

use super::manifest::{
    DirectoryManifest, EntryType, ManifestCrypto, ReconstructedEntry, ReconstructionError,
    ReconstructionResult, ReconstructionStatus,
};

#[derive(Debug, Clone, Copy)]
pub struct DirectoryManagerMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub healthy: bool,
}

/// Encrypted directory-manifest storage and reconstruction over a
/// [`StorageManager`] (spec §4.10). The manifest cache is strictly
/// observational — evicting an entry never changes durable state (spec §3).
pub struct DirectoryManager {
    storage: Arc<StorageManager>,
    crypto: Arc<dyn ManifestCrypto>,
    cache: LruTtlCache<String, DirectoryManifest>,
    max_manifest_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    cache_capacity: usize,
}

impl DirectoryManager {
    pub fn new(storage: Arc<StorageManager>, crypto: Arc<dyn ManifestCrypto>, cache_capacity: usize, cache_ttl: Duration, max_manifest_size: usize) -> Self {
        Self {
            storage,
            crypto,
            cache: LruTtlCache::new(cache_capacity, cache_ttl),
            max_manifest_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cache_capacity,
        }
    }

    /// Encrypts and stores `manifest` under `path`, rejecting oversized
    /// ciphertext, and populates the cache (spec §4.10 "Manifest storage").
    pub async fn store_manifest(&self, ctx: &OpContext, path: &str, manifest: DirectoryManifest) -> Result<String> {
        let ciphertext = self.crypto.encrypt(&manifest)?;
        if ciphertext.len() > self.max_manifest_size {
            return Err(StorageError::operation(
                ErrorKind::InvalidRequest,
                "store_manifest",
                format!("manifest ciphertext ({} bytes) exceeds max-manifest-size ({} bytes)", ciphertext.len(), self.max_manifest_size),
            ));
        }

        let block = Block::new(ciphertext);
        let address = self.storage.put(ctx, &block).await?;

        self.cache.put(path.to_string(), manifest);
        Ok(address.id().to_string())
    }

    /// Consults the cache first; on miss, fetches, decrypts, and caches
    /// the manifest behind `cid` (spec §4.10 "Manifest retrieval").
    pub async fn retrieve_manifest(&self, ctx: &OpContext, path: &str, cid: &str) -> Result<DirectoryManifest> {
        if let Some(manifest) = self.cache.get(&path.to_string()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(manifest);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let address = crate::block::BlockAddress::from_legacy_cid(cid.to_string(), String::new());
        let block = self.storage.get(ctx, &address).await?;
        let manifest = self.crypto.decrypt(block.data())?;

        self.cache.put(path.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Walks `manifest`'s entries in order, decrypting each name.
    /// Cancellable at every iteration boundary: cancellation transitions
    /// status to `Cancelled` and returns the partial result accumulated so
    /// far. Per-entry decrypt failures are collected and do not abort the
    /// walk (spec §4.10 "Reconstruction").
    pub async fn reconstruct(&self, ctx: &OpContext, cid: &str, cancel: &CancellationToken) -> Result<ReconstructionResult> {
        let address = crate::block::BlockAddress::from_legacy_cid(cid.to_string(), String::new());
        let block = match self.storage.get(ctx, &address).await {
            Ok(b) => b,
            Err(err) => {
                return Ok(ReconstructionResult { status: ReconstructionStatus::Failed, entries: Vec::new(), errors: vec![ReconstructionError { index: 0, reason: err.to_string() }] });
            }
        };

        let manifest = match self.crypto.decrypt(block.data()) {
            Ok(m) => m,
            Err(err) => {
                return Ok(ReconstructionResult { status: ReconstructionStatus::Failed, entries: Vec::new(), errors: vec![ReconstructionError { index: 0, reason: err.to_string() }] });
            }
        };

        let mut entries = Vec::with_capacity(manifest.entries.len());
        let mut errors = Vec::new();

        for (index, entry) in manifest.entries.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(ReconstructionResult { status: ReconstructionStatus::Cancelled, entries, errors });
            }

            match self.crypto.decrypt_name(&entry.encrypted_name) {
                Ok(name) => entries.push(ReconstructedEntry {
                    name,
                    cid: entry.cid.clone(),
                    entry_type: entry.entry_type,
                    size: entry.size,
                }),
                Err(err) => errors.push(ReconstructionError { index, reason: err.to_string() }),
            }
        }

        Ok(ReconstructionResult { status: ReconstructionStatus::Completed, entries, errors })
    }

    /// `healthy=false` when the hit-rate falls below 0.5 after at least 100
    /// lookups, or when the storage manager is not connected to any backend
    /// (spec §4.10 "Metrics").
    pub async fn metrics(&self) -> DirectoryManagerMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 1.0 } else { hits as f64 / total as f64 };

        let status = self.storage.status().await;
        let storage_connected = status.active_backends > 0;
        let healthy = storage_connected && !(total >= 100 && hit_rate < 0.5);

        DirectoryManagerMetrics {
            cache_hits: hits,
            cache_misses: misses,
            cache_size: self.cache.len(),
            max_size: self.cache_capacity,
            hit_rate,
            healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::{BackendConfig, ConnectionConfig, DistributionConfig, HealthCheckConfig, StorageConfig};
    use std::collections::HashMap;
    use std::time::SystemTime;

    struct FakeCrypto;
    impl ManifestCrypto for FakeCrypto {
        fn encrypt(&self, manifest: &DirectoryManifest) -> Result<Vec<u8>> {
            Ok(format!("enc:{}", manifest.entries.len()).into_bytes())
        }
        fn decrypt(&self, ciphertext: &[u8]) -> Result<DirectoryManifest> {
            let text = String::from_utf8_lossy(ciphertext);
            let count: usize = text.trim_start_matches("enc:").parse().unwrap_or(0);
            let entries = (0..count)
                .map(|i| crate::directory::manifest::ManifestEntry {
                    encrypted_name: format!("name{}", i).into_bytes(),
                    cid: format!("child{}", i),
                    entry_type: EntryType::File,
                    size: 10,
                    modified: SystemTime::now(),
                })
                .collect();
            Ok(DirectoryManifest::new(entries))
        }
        fn decrypt_name(&self, encrypted_name: &[u8]) -> Result<String> {
            Ok(String::from_utf8_lossy(encrypted_name).to_string())
        }
    }

    struct FailingNameCrypto;
    impl ManifestCrypto for FailingNameCrypto {
        fn encrypt(&self, manifest: &DirectoryManifest) -> Result<Vec<u8>> {
            Ok(format!("enc:{}", manifest.entries.len()).into_bytes())
        }
        fn decrypt(&self, ciphertext: &[u8]) -> Result<DirectoryManifest> {
            let text = String::from_utf8_lossy(ciphertext);
            let count: usize = text.trim_start_matches("enc:").parse().unwrap_or(0);
            let entries = (0..count)
                .map(|i| crate::directory::manifest::ManifestEntry {
                    encrypted_name: format!("name{}", i).into_bytes(),
                    cid: format!("child{}", i),
                    entry_type: EntryType::File,
                    size: 10,
                    modified: SystemTime::now(),
                })
                .collect();
            Ok(DirectoryManifest::new(entries))
        }
        fn decrypt_name(&self, encrypted_name: &[u8]) -> Result<String> {
            if encrypted_name == b"name1" {
                Err(StorageError::operation(ErrorKind::InvalidRequest, "decrypt_name", "broken key"))
            } else {
                Ok(String::from_utf8_lossy(encrypted_name).to_string())
            }
        }
    }

    async fn test_manager() -> Arc<StorageManager> {
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
        let config = StorageConfig {
            default_backend: "mock1".to_string(),
            backends,
            distribution: DistributionConfig { strategy: "single".to_string() },
            health_check: HealthCheckConfig { enabled: true, interval_ms: 200, timeout_ms: 50 },
            performance: Default::default(),
        };

        let manager = Arc::new(StorageManager::new(config).unwrap());
        manager.register_backend("mock1", Arc::new(MockBackend::new("mock1"))).await;
        manager.start(&OpContext::new()).await.unwrap();
        manager
    }

    fn sample_manifest(n: usize) -> DirectoryManifest {
        let entries = (0..n)
            .map(|i| crate::directory::manifest::ManifestEntry {
                encrypted_name: format!("name{}", i).into_bytes(),
                cid: format!("child{}", i),
                entry_type: EntryType::File,
                size: 10,
                modified: SystemTime::now(),
            })
            .collect();
        DirectoryManifest::new(entries)
    }

    #[tokio::test]
    async fn store_then_retrieve_roundtrips_through_cache_miss_then_hit() {
        let storage = test_manager().await;
        let dm = DirectoryManager::new(storage, Arc::new(FakeCrypto), 10, Duration::from_secs(60), 1_000_000);

        let ctx = OpContext::new();
        let cid = dm.store_manifest(&ctx, "dir/a", sample_manifest(2)).await.unwrap();

        // Already cached by store_manifest, so retrieve hits immediately.
        let manifest = dm.retrieve_manifest(&ctx, "dir/a", &cid).await.unwrap();
        assert_eq!(manifest.len(), 2);

        let metrics = dm.metrics().await;
        assert_eq!(metrics.cache_hits, 1);
    }

    #[tokio::test]
    async fn oversized_ciphertext_is_rejected() {
        let storage = test_manager().await;
        let dm = DirectoryManager::new(storage, Arc::new(FakeCrypto), 10, Duration::from_secs(60), 4);

        let ctx = OpContext::new();
        let err = dm.store_manifest(&ctx, "dir/a", sample_manifest(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn reconstruct_collects_per_entry_errors_without_aborting() {
        let storage = test_manager().await;
        let dm = DirectoryManager::new(storage, Arc::new(FailingNameCrypto), 10, Duration::from_secs(60), 1_000_000);

        let ctx = OpContext::new();
        let cid = dm.store_manifest(&ctx, "dir/a", sample_manifest(3)).await.unwrap();

        let cancel = CancellationToken::new();
        let result = dm.reconstruct(&ctx, &cid, &cancel).await.unwrap();

        assert_eq!(result.status, ReconstructionStatus::Completed);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);
    }

    #[tokio::test]
    async fn reconstruct_returns_partial_result_on_cancellation() {
        let storage = test_manager().await;
        let dm = DirectoryManager::new(storage, Arc::new(FakeCrypto), 10, Duration::from_secs(60), 1_000_000);

        let ctx = OpContext::new();
        let cid = dm.store_manifest(&ctx, "dir/a", sample_manifest(5)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = dm.reconstruct(&ctx, &cid, &cancel).await.unwrap();

        assert_eq!(result.status, ReconstructionStatus::Cancelled);
        assert!(result.entries.is_empty());
    }
}
