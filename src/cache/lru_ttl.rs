//! Generic LRU+TTL container (spec §4.11): "a doubly-linked list threaded
//! through entries plus a map keyed by the logical key for O(1) lookup."
//! The list is intrusive over a slab (`Vec<Option<Node<K, V>>>`) so unlinking
//! and relinking a node on every `get`/`put` is O(1) instead of the O(n)
//! scan a `VecDeque`-based order queue requires.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Node<K, V> {
    key: K,
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K, V> Node<K, V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Fixed-capacity, per-entry-TTL cache. Get evicts (and reports a miss for)
/// an expired entry lazily; Put overwrites and moves the key to the front,
/// evicting the least-recently-used tail entry on overflow.
pub struct LruTtlCache<K, V> {
    capacity: usize,
    default_ttl: Duration,
    inner: RwLock<Inner<K, V>>,
}

/// `slots[idx]` holds a live node until it's freed, at which point `idx` is
/// pushed onto `free` for reuse by the next insertion. `index` maps a
/// logical key to its slot so lookups never walk the list.
struct Inner<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.slots[idx].as_ref().expect("unlink on live node");
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.slots[idx].as_mut().expect("push_front on live node");
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn free_slot(&mut self, idx: usize) -> Node<K, V> {
        let node = self.slots[idx].take().expect("free_slot on live node");
        self.index.remove(&node.key);
        self.free.push(idx);
        node
    }

    fn evict_tail(&mut self) {
        if let Some(idx) = self.tail {
            self.unlink(idx);
            self.free_slot(idx);
        }
    }

    fn insert_new(&mut self, key: K, node: Node<K, V>) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        idx
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

impl<K, V> LruTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                index: HashMap::new(),
                head: None,
                tail: None,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `None` on miss, including a lazily-evicted expired entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();

        let idx = *inner.index.get(key)?;
        if inner.slots[idx].as_ref().unwrap().is_expired() {
            inner.unlink(idx);
            inner.free_slot(idx);
            return None;
        }

        inner.touch(idx);
        Some(inner.slots[idx].as_ref().unwrap().value.clone())
    }

    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.write();

        if let Some(&idx) = inner.index.get(&key) {
            {
                let node = inner.slots[idx].as_mut().unwrap();
                node.value = value;
                node.inserted_at = Instant::now();
                node.ttl = ttl;
            }
            inner.touch(idx);
            return;
        }

        if inner.len() >= self.capacity {
            inner.evict_tail();
        }

        let node = Node {
            key: key.clone(),
            value,
            inserted_at: Instant::now(),
            ttl,
            prev: None,
            next: None,
        };
        inner.insert_new(key, node);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write();
        let idx = *inner.index.get(key)?;
        inner.unlink(idx);
        Some(inner.free_slot(idx).value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.slots.clear();
        inner.free.clear();
        inner.index.clear();
        inner.head = None;
        inner.tail = None;
    }

    /// Scans for expired entries and removes them, returning the count removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.write();
        let expired: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&idx| inner.slots[idx].as_ref().unwrap().is_expired())
            .collect();

        for idx in &expired {
            inner.unlink(*idx);
            inner.free_slot(*idx);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = LruTtlCache::new(3, Duration::from_secs(60));
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");
        cache.put(4, "d"); // evicts 1

        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get(&4), Some("d"));
    }

    #[test]
    fn get_touches_recency() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.put(1, "a");
        cache.put(2, "b");
        cache.get(&1); // 1 is now most-recently-used
        cache.put(3, "c"); // evicts 2, not 1

        assert_eq!(cache.get(&1), Some("a"));
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn ttl_expiry_is_checked_lazily_on_get() {
        let cache = LruTtlCache::new(3, Duration::from_millis(20));
        cache.put(1, "a");
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_removes_only_expired_entries() {
        let cache = LruTtlCache::new(5, Duration::from_secs(60));
        cache.put_with_ttl(1, "a", Duration::from_millis(10));
        cache.put_with_ttl(2, "b", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        let removed = cache.cleanup();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), Some("b"));
    }

    #[test]
    fn repeated_insert_and_evict_reuses_freed_slots() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        for i in 0..10 {
            cache.put(i, i * 10);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&9), Some(90));
        assert_eq!(cache.get(&8), Some(80));
        assert!(cache.get(&0).is_none());
    }

    #[test]
    fn overwriting_existing_key_does_not_grow_length() {
        let cache = LruTtlCache::new(3, Duration::from_secs(60));
        cache.put("k", 1);
        cache.put("k", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k"), Some(2));
    }
}
