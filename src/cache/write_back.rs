//! Write-back cache for block storage acceleration (spec §4.11 companion to
//! the LRU+TTL primitive). Writes land in an in-memory buffer; a periodic
//! flusher and a pool of flush workers drain dirty entries to the underlying
//! store through a bounded queue, mirroring the worker-pool shape of a
//! connection-pool manager.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Durable destination a dirty entry is eventually flushed to.
#[async_trait]
pub trait FlushSink<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn flush(&self, key: K, value: V) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WriteBackStats {
    pub buffered: usize,
    pub flushes: u64,
    pub coalesced_writes: u64,
    pub forced_flushes: u64,
}

struct Dirty<V> {
    value: V,
}

/// In-memory buffer for keys of type `K` and values of type `V`, backed by
/// `sink` for eventual durability.
pub struct WriteBackCache<K, V> {
    buffer: DashMap<K, Dirty<V>>,
    order: Mutex<VecDeque<K>>,
    max_buffered: usize,
    sink: Arc<dyn FlushSink<K, V>>,
    flush_tx: mpsc::Sender<K>,
    flush_rx: Mutex<Option<mpsc::Receiver<K>>>,
    flushes: AtomicU64,
    coalesced: AtomicU64,
    forced: AtomicU64,
    cancel: CancellationToken,
}

impl<K, V> WriteBackCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_buffered: usize, queue_capacity: usize, sink: Arc<dyn FlushSink<K, V>>) -> Arc<Self> {
        let (flush_tx, flush_rx) = mpsc::channel(queue_capacity);
        Arc::new(Self {
            buffer: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_buffered: max_buffered.max(1),
            sink,
            flush_tx,
            flush_rx: Mutex::new(Some(flush_rx)),
            flushes: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            forced: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn stats(&self) -> WriteBackStats {
        WriteBackStats {
            buffered: self.buffer.len(),
            flushes: self.flushes.load(Ordering::Relaxed),
            coalesced_writes: self.coalesced.load(Ordering::Relaxed),
            forced_flushes: self.forced.load(Ordering::Relaxed),
        }
    }

    /// Checks the write-back buffer only; a miss means the caller should fall
    /// through to the underlying store.
    pub fn get(&self, key: &K) -> Option<V> {
        self.buffer.get(key).map(|e| e.value.clone())
    }

    /// Buffers `value` under `key`. Same-key writes while a dirty copy is
    /// buffered update it in place and bump the coalesced-write counter
    /// instead of queuing a second flush. Exceeding `max_buffered` forces a
    /// synchronous flush of the oldest dirty entry first.
    pub async fn put(&self, key: K, value: V) -> Result<()> {
        if self.buffer.contains_key(&key) {
            self.buffer.insert(key, Dirty { value });
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if self.buffer.len() >= self.max_buffered {
            self.force_flush_oldest().await?;
        }

        self.buffer.insert(key.clone(), Dirty { value });
        self.order.lock().push_back(key.clone());
        let _ = self.flush_tx.try_send(key);
        Ok(())
    }

    async fn force_flush_oldest(&self) -> Result<()> {
        let oldest = self.order.lock().pop_front();
        if let Some(key) = oldest {
            self.flush_one(key).await?;
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn flush_one(&self, key: K) -> Result<()> {
        if let Some((_, dirty)) = self.buffer.remove(&key) {
            self.order.lock().retain(|k| k != &key);
            self.sink.flush(key, dirty.value).await?;
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Spawns `workers` flush-worker tasks draining the flush queue, plus one
    /// periodic flusher sweeping any buffered entries the queue missed
    /// (e.g. dropped under backpressure). Returns the cancellation token the
    /// caller should cancel to stop all of them.
    pub fn start(self: &Arc<Self>, workers: usize, sweep_interval: Duration) -> CancellationToken {
        let rx = self.flush_rx.lock().take();
        if let Some(rx) = rx {
            let shared_rx = Arc::new(tokio::sync::Mutex::new(rx));
            for _ in 0..workers.max(1) {
                let this = Arc::clone(self);
                let shared_rx = Arc::clone(&shared_rx);
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut guard = shared_rx.lock().await;
                            tokio::select! {
                                _ = cancel.cancelled() => None,
                                key = guard.recv() => key,
                            }
                        };
                        match next {
                            Some(key) => {
                                if let Err(err) = this.flush_one(key).await {
                                    warn!(error = %err, "write-back flush worker failed");
                                }
                            }
                            None => break,
                        }
                    }
                });
            }
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let stale: Vec<K> = this.order.lock().iter().cloned().collect();
                        debug!(buffered = stale.len(), "write-back periodic sweep");
                        for key in stale {
                            let _ = this.flush_one(key).await;
                        }
                    }
                }
            }
        });

        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        flushed: AsyncMutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl FlushSink<u64, String> for RecordingSink {
        async fn flush(&self, key: u64, value: String) -> Result<()> {
            self.flushed.lock().await.push((key, value));
            Ok(())
        }
    }

    #[tokio::test]
    async fn coalesces_repeated_writes_to_same_key() {
        let sink = Arc::new(RecordingSink {
            flushed: AsyncMutex::new(Vec::new()),
        });
        let cache = WriteBackCache::new(10, 10, sink);

        cache.put(1, "a".to_string()).await.unwrap();
        cache.put(1, "b".to_string()).await.unwrap();

        assert_eq!(cache.get(&1), Some("b".to_string()));
        assert_eq!(cache.stats().coalesced_writes, 1);
        assert_eq!(cache.stats().buffered, 1);
    }

    #[tokio::test]
    async fn buffer_full_forces_synchronous_flush_of_oldest() {
        let sink = Arc::new(RecordingSink {
            flushed: AsyncMutex::new(Vec::new()),
        });
        let cache = WriteBackCache::new(2, 10, sink.clone());

        cache.put(1, "a".to_string()).await.unwrap();
        cache.put(2, "b".to_string()).await.unwrap();
        cache.put(3, "c".to_string()).await.unwrap(); // forces flush of key 1

        assert_eq!(cache.stats().forced_flushes, 1);
        assert!(cache.get(&1).is_none());
        let flushed = sink.flushed.lock().await;
        assert!(flushed.iter().any(|(k, _)| *k == 1));
    }

    #[tokio::test]
    async fn flushing_a_key_removes_it_from_the_order_queue() {
        let sink = Arc::new(RecordingSink {
            flushed: AsyncMutex::new(Vec::new()),
        });
        let cache = WriteBackCache::new(10, 10, sink);

        cache.put(1, "a".to_string()).await.unwrap();
        cache.flush_one(1).await.unwrap();

        assert_eq!(cache.order.lock().len(), 0);
    }
}
