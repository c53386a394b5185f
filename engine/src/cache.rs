//! Read-through cache with per-entry TTL on top of an LRU core.
//!
//! One lock guards both the LRU order and the insertion timestamps. Expired
//! entries are invalidated on read before the miss is resolved, so the cache
//! never serves a value older than its TTL.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    inserted_at: Instant,
    value: V,
}

/// Bounded LRU cache whose entries expire `ttl` after insertion.
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    ttl: Duration,
    inner: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            ttl,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up `key`, resolving a miss (or an expired entry) with `loader`.
    ///
    /// The loader runs under the cache lock: concurrent readers of the same
    /// key see exactly one load per TTL window, which is what keeps
    /// expected-error logging to one line per window.
    pub fn get_with(&self, key: K, loader: impl FnOnce() -> V) -> V {
        let mut cache = self.inner.lock().expect("cache mutex poisoned");
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                return entry.value.clone();
            }
            cache.pop(&key);
        }
        let value = loader();
        cache.put(
            key,
            Entry {
                inserted_at: Instant::now(),
                value: value.clone(),
            },
        );
        value
    }

    /// Drop an entry, forcing the next read through the loader.
    pub fn invalidate(&self, key: &K) {
        self.inner.lock().expect("cache mutex poisoned").pop(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
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
    fn test_loader_called_once_within_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(300), 8);
        let calls = AtomicUsize::new(0);

        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            42
        };

        assert_eq!(cache.get_with("k".to_string(), load), 42);
        assert_eq!(cache.get_with("k".to_string(), || unreachable!()), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ttl_expiry_reloads() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_millis(10), 8);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache.get_with("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                7
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(20));

        let v = cache.get_with("k", || {
            calls.fetch_add(1, Ordering::SeqCst);
            8
        });
        assert_eq!(v, 8, "expired entry must be reloaded, not served");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(300), 2);
        cache.get_with(1, || 10);
        cache.get_with(2, || 20);
        cache.get_with(3, || 30); // evicts key 1
        assert_eq!(cache.len(), 2);

        let reloaded = AtomicUsize::new(0);
        cache.get_with(1, || {
            reloaded.fetch_add(1, Ordering::SeqCst);
            11
        });
        assert_eq!(reloaded.load(Ordering::SeqCst), 1, "evicted key reloads");
    }

    #[test]
    fn test_invalidate() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_secs(300), 8);
        cache.get_with("k", || 1);
        cache.invalidate(&"k");
        assert!(cache.is_empty());
        assert_eq!(cache.get_with("k", || 2), 2);
    }
}
