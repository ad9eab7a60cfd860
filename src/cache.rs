//! Thread-safe, compute-once caches: `ThreadSafeCache` gives every key a
//! single in-flight computation shared across concurrent callers, and
//! `SizedCache` adds an LRU eviction policy over a byte-size budget. The
//! per-key single-flight behavior is built from `once_cell::sync::OnceCell`
//! behind a `parking_lot::RwLock`; the cache is an owned value rather than a
//! process-global singleton.
use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

/// An unbounded cache where concurrent callers requesting the same key
/// block on a single in-flight computation rather than duplicating work.
pub struct ThreadSafeCache<K, V> {
    entries: RwLock<AHashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for ThreadSafeCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self { entries: RwLock::new(AHashMap::default()) }
    }
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, computing it with `compute` the
    /// first time `key` is seen. Concurrent calls for the same key share one
    /// computation; calls for different keys never block each other.
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        let cell = {
            let entries = self.entries.read();
            if let Some(cell) = entries.get(&key) {
                Arc::clone(cell)
            } else {
                drop(entries);
                let mut entries = self.entries.write();
                Arc::clone(entries.entry(key).or_insert_with(|| Arc::new(OnceCell::new())))
            }
        };
        cell.get_or_init(compute).clone()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-entry size estimator, so the cache can track a byte budget instead of
/// a raw entry count. Mirrors `ThreadSafeCacheSized::DefaultPolicy::size` in
/// the C++ original.
pub trait EntrySize {
    fn entry_size(&self) -> usize;
}

/// A [`ThreadSafeCache`] with an LRU eviction policy capped at a byte-size
/// budget rather than an entry count, for caching compiled grammars and
/// precomputed token masks whose individual size varies widely.
pub struct SizedCache<K, V> {
    inner: Mutex<SizedCacheInner<K, V>>,
    max_bytes: Option<usize>,
}

struct SizedCacheInner<K, V> {
    lru: LruCache<K, (Arc<V>, usize)>,
    current_bytes: usize,
}

impl<K, V> SizedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: EntrySize,
{
    pub fn new(max_bytes: Option<usize>) -> Self {
        let lru = LruCache::unbounded();
        Self { inner: Mutex::new(SizedCacheInner { lru, current_bytes: 0 }), max_bytes }
    }

    /// Looks up `key` without computing anything on a miss, promoting it in
    /// the LRU order on a hit.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().lru.get(key).map(|(value, _)| Arc::clone(value))
    }

    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> Arc<V> {
        {
            let mut inner = self.inner.lock();
            if let Some((value, _)) = inner.lru.get(&key) {
                return Arc::clone(value);
            }
        }
        let value = Arc::new(compute());
        let size = value.entry_size();
        let mut inner = self.inner.lock();
        // Another thread may have raced us to the same key; prefer its
        // entry so both callers observe the same `Arc`.
        if let Some((existing, _)) = inner.lru.get(&key) {
            return Arc::clone(existing);
        }
        inner.current_bytes += size;
        inner.lru.put(key, (Arc::clone(&value), size));
        self.evict_to_budget(&mut inner);
        value
    }

    fn evict_to_budget(&self, inner: &mut SizedCacheInner<K, V>) {
        let Some(budget) = self.max_bytes else { return };
        while inner.current_bytes > budget {
            match inner.lru.pop_lru() {
                Some((_, (_, size))) => inner.current_bytes = inner.current_bytes.saturating_sub(size),
                None => break,
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.current_bytes = 0;
    }

    pub fn memory_size(&self) -> usize {
        self.inner.lock().current_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn concurrent_cache_computes_once_per_key() {
        let cache: ThreadSafeCache<u32, u32> = ThreadSafeCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let calls = Arc::clone(&calls);
            let v = cache.get_or_insert_with(1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                42
            });
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Blob(Vec<u8>);
    impl EntrySize for Blob {
        fn entry_size(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn sized_cache_evicts_oldest_when_over_budget() {
        let cache: SizedCache<u32, Blob> = SizedCache::new(Some(10));
        cache.get_or_insert_with(1, || Blob(vec![0; 6]));
        cache.get_or_insert_with(2, || Blob(vec![0; 6]));
        assert!(cache.memory_size() <= 10);
        assert_eq!(cache.len(), 1);
    }
}
