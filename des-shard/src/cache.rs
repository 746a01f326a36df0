//! Mutex-wrapped LRU cache shared by retrievers and metadata managers.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Thread-safe LRU cache; values are cloned out, so callers typically
/// store `Arc`-wrapped payloads.
pub struct SharedLruCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> SharedLruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("nonzero default"));
        SharedLruCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.put(key, value);
    }

    pub fn remove(&self, key: &K) {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.pop(key);
    }

    pub fn len(&self) -> usize {
        let cache = self.inner.lock().expect("cache lock poisoned");
        cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V: Clone> Default for SharedLruCache<K, V> {
    fn default() -> Self {
        SharedLruCache::new(DEFAULT_CACHE_CAPACITY)
    }
}
