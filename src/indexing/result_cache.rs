//! Search result cache (spec §4.9 "result cache"): keyed by a deterministic
//! hash of the query plus its normalized options, flushed entirely on every
//! successful index mutation since any document change can affect any
//! cached result set.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::cache::LruTtlCache;

use super::search::{SearchOptions, SearchResults};

fn cache_key(query: &str, options: &SearchOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"\0");
    hasher.update(options.normalized().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ResultCache {
    inner: LruTtlCache<String, SearchResults>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { inner: LruTtlCache::new(capacity, ttl) }
    }

    pub fn get(&self, query: &str, options: &SearchOptions) -> Option<SearchResults> {
        self.inner.get(&cache_key(query, options))
    }

    pub fn put(&self, query: &str, options: &SearchOptions, results: SearchResults) {
        self.inner.put(cache_key(query, options), results);
    }

    /// Drops every cached result. Called after any `update_index` or
    /// `remove_from_index` succeeds, since a single document change can
    /// change the ranking or membership of an arbitrary number of cached
    /// queries (spec §4.9).
    pub fn invalidate_all(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
