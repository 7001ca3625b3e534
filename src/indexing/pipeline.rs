//! Indexing pipeline orchestrator (spec §4.9 "SearchManager"): owns the
//! queue, the worker pool, the document index, the result cache, and the
//! Start/Stop lifecycle, in a connection-pool worker idiom (bounded queue,
//! fixed worker count, cancellation token).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::error::Result;

use super::document::{build_document, ContentProvider, FileIndexLookup, FileLister};
use super::index_store::DocumentIndex;
use super::queue::{IndexOperation, IndexQueue, IndexRequest};
use super::result_cache::ResultCache;
use super::search::{search, search_metadata, MetadataFilters, SearchOptions, SearchResults};

const ENQUEUE_WAIT: Duration = Duration::from_millis(200);

/// Counts surfaced by `SearchManager::metrics` (SPEC_FULL.md §3.1 metrics
/// surface, mirrored per-subsystem the way a pool manager's statistics
/// struct does).
#[derive(Debug, Default, Clone)]
pub struct IndexingMetrics {
    pub documents_indexed: u64,
    pub documents_removed: u64,
    pub requests_failed: u64,
    pub queue_depth: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct Counters {
    documents_indexed: std::sync::atomic::AtomicU64,
    documents_removed: std::sync::atomic::AtomicU64,
    requests_failed: std::sync::atomic::AtomicU64,
    cache_hits: std::sync::atomic::AtomicU64,
    cache_misses: std::sync::atomic::AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            documents_indexed: Default::default(),
            documents_removed: Default::default(),
            requests_failed: Default::default(),
            cache_hits: Default::default(),
            cache_misses: Default::default(),
        }
    }
}

/// Orchestrates the indexing worker pool, the document index, and the
/// search surface (spec §4.9). Lifecycle mirrors [`crate::manager::StorageManager`]:
/// `Start` spawns workers, `Stop` cancels them and drains.
pub struct SearchManager {
    config: SearchConfig,
    queue: Arc<IndexQueue>,
    index: Arc<DocumentIndex>,
    cache: Arc<ResultCache>,
    file_index: Arc<dyn FileIndexLookup>,
    extractor: Arc<dyn ContentProvider>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    workers: RwLock<Vec<JoinHandle<()>>>,
    watcher: RwLock<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl SearchManager {
    pub fn new(config: SearchConfig, file_index: Arc<dyn FileIndexLookup>, extractor: Arc<dyn ContentProvider>) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(IndexQueue::new(config.batch_size * 2));
        let cache = Arc::new(ResultCache::new(config.cache_size, Duration::from_millis(config.cache_ttl_ms)));

        Ok(Self {
            config,
            queue,
            index: Arc::new(DocumentIndex::new()),
            cache,
            file_index,
            extractor,
            counters: Arc::new(Counters::new()),
            cancel: CancellationToken::new(),
            workers: RwLock::new(Vec::new()),
            watcher: RwLock::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Spawns `config.workers` dequeue loops (spec §4.9 "worker pool").
    /// Idempotent: calling `start` again while already started is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.workers.write().await;
        for worker_id in 0..self.config.workers {
            let queue = Arc::clone(&self.queue);
            let index = Arc::clone(&self.index);
            let file_index = Arc::clone(&self.file_index);
            let extractor = Arc::clone(&self.extractor);
            let counters = Arc::clone(&self.counters);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, index, file_index, extractor, counters, cancel).await;
            }));
        }
    }

    /// Cancels the worker loops and joins them (spec §4.9 "Workers
    /// terminate when the queue closes").
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.queue.close();
        self.cancel.cancel();

        if let Some(handle) = self.watcher.write().await.take() {
            let _ = handle.await;
        }

        let mut handles = self.workers.write().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Spawns the optional periodic file watcher (spec §4.9 "File watcher").
    /// Each tick asks `lister` for entries modified since the last tick and
    /// enqueues a normal-priority `update` for each; `last_check` then
    /// advances to the tick's observation time. A no-op if the manager has
    /// not been started or the watcher is already running.
    pub async fn start_file_watcher(&self, lister: Arc<dyn FileLister>, interval: Duration) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let mut slot = self.watcher.write().await;
        if slot.is_some() {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let cancel = self.cancel.clone();

        *slot = Some(tokio::spawn(async move {
            watcher_loop(queue, lister, interval, cancel).await;
        }));
    }

    /// Enqueues an add/update request. Returns `queue-full` on backpressure
    /// without surfacing the eventual downstream indexing outcome (spec §7:
    /// "update_index returns only queue-acceptance, never the downstream
    /// per-request indexing result"). The result cache is flushed here, at
    /// enqueue time, not when the worker later completes the request (spec
    /// §5 ordering guarantees).
    pub async fn update_index(&self, path: impl Into<String>, priority: i32) -> Result<()> {
        let req = IndexRequest::new(IndexOperation::Update, path).with_priority(priority);
        self.queue.enqueue(req, ENQUEUE_WAIT).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Enqueues a delete request with the same backpressure and
    /// enqueue-time cache-flush contract as [`Self::update_index`].
    pub async fn remove_from_index(&self, path: impl Into<String>, priority: i32) -> Result<()> {
        let req = IndexRequest::new(IndexOperation::Delete, path).with_priority(priority);
        self.queue.enqueue(req, ENQUEUE_WAIT).await?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Low-priority re-enqueue sweep over every path the worker loops would
    /// ever see, used to recover from a lost update or a file-watcher gap
    /// (spec §4.9 "rebuild").
    pub async fn rebuild(&self, paths: impl IntoIterator<Item = String>) -> Result<usize> {
        let mut scheduled = 0;
        for path in paths {
            let req = IndexRequest::new(IndexOperation::Update, path).with_priority(1);
            self.queue.enqueue(req, ENQUEUE_WAIT).await?;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// Runs a query against the current index, serving from the result
    /// cache when available (spec §4.9 "result cache").
    pub fn search(&self, query: &str, options: &SearchOptions) -> SearchResults {
        if let Some(cached) = self.cache.get(query, options) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached;
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let results = search(&self.index, query, options);
        self.cache.put(query, options, results.clone());
        results
    }

    /// Structured metadata-only search (spec §4.9 "Metadata search"): no
    /// free-text query, `filters` alone narrows the full document set.
    /// Cached under a reserved marker distinct from any real query string.
    pub fn search_metadata(&self, filters: MetadataFilters) -> Result<SearchResults> {
        const METADATA_QUERY_MARKER: &str = "\u{0}metadata-search";
        let options = SearchOptions { filters: filters.clone(), ..SearchOptions::default() };

        if let Some(cached) = self.cache.get(METADATA_QUERY_MARKER, &options) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let results = search_metadata(&self.index, &filters, &options);
        self.cache.put(METADATA_QUERY_MARKER, &options, results.clone());
        Ok(results)
    }

    pub async fn metrics(&self) -> IndexingMetrics {
        IndexingMetrics {
            documents_indexed: self.counters.documents_indexed.load(Ordering::Relaxed),
            documents_removed: self.counters.documents_removed.load(Ordering::Relaxed),
            requests_failed: self.counters.requests_failed.load(Ordering::Relaxed),
            queue_depth: self.queue.len().await,
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    queue: Arc<IndexQueue>,
    index: Arc<DocumentIndex>,
    file_index: Arc<dyn FileIndexLookup>,
    extractor: Arc<dyn ContentProvider>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let req = match queue.dequeue(&cancel).await {
            Some(req) => req,
            None => {
                tracing::debug!(worker_id, "index worker exiting, queue drained and closed");
                return;
            }
        };

        // The result cache was already flushed when this request was
        // enqueued (spec §5 ordering guarantees), so completion here only
        // updates the document index and counters.
        match req.operation {
            IndexOperation::Add | IndexOperation::Update => {
                match build_document(&req.path, &req.metadata, file_index.as_ref(), extractor.as_ref()) {
                    Ok(doc) => {
                        index.upsert(&doc);
                        counters.documents_indexed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        tracing::warn!(worker_id, path = %req.path, error = %err, "index request failed, continuing");
                        counters.requests_failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            IndexOperation::Delete => {
                if index.remove(&req.path) {
                    counters.documents_removed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Periodic tick loop: newer-than-`last_check` entries get a normal-priority
/// `update` enqueue; enqueue uses a short bounded wait and is best-effort —
/// a `queue-full` here is dropped, the next tick will pick the path back up
/// (spec §4.9 "File watcher").
async fn watcher_loop(queue: Arc<IndexQueue>, lister: Arc<dyn FileLister>, interval: Duration, cancel: CancellationToken) {
    const WATCHER_ENQUEUE_WAIT: Duration = Duration::from_millis(100);
    let mut ticker = tokio::time::interval(interval);
    let mut last_check = SystemTime::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("file watcher exiting on cancellation");
                return;
            }
            _ = ticker.tick() => {}
        }

        let observed_at = SystemTime::now();
        for (path, _modified) in lister.list_modified_since(last_check) {
            let req = IndexRequest::new(IndexOperation::Update, path.clone()).with_priority(5);
            if let Err(err) = queue.enqueue(req, WATCHER_ENQUEUE_WAIT).await {
                tracing::debug!(path = %path, error = %err, "file watcher enqueue dropped, will retry next tick");
            }
        }
        last_check = observed_at;
    }
}
