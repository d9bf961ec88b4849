//! Bounded Associative Cache
//!
//! Purpose: Size- and age-bounded cache used by the socket manager to keep a
//! working set of open connections without letting idle ones pile up.
//!
//! Each stored value carries a monotonically increasing generation stamp that
//! is refreshed on every successful read, so eviction under size pressure
//! removes the entry touched longest ago. A flush handler (when installed)
//! runs for every value that leaves the cache through eviction, expiry, or
//! `clear` - but not through `remove_key`, which hands the value back to the
//! caller untouched.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

/// Loader invoked by `get` on a cache miss.
pub type Fetcher<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// Invoked for values leaving the cache via eviction, expiry, or `clear`.
pub type FlushHandler<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

struct TimestampedValue<V> {
    value: V,
    when_loaded: Instant,
    generation: u64,
}

/// Concurrent bounded cache with freshness-based expiry.
pub struct Lru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    cache: DashMap<K, TimestampedValue<V>>,
    maximum_size: usize,
    max_age: Duration,
    next_generation: AtomicU64,
    fetcher: Option<Fetcher<K, V>>,
    flush_handler: RwLock<Option<FlushHandler<K, V>>>,
}

impl<K, V> Lru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache bounded to `maximum_size` entries, each kept at most
    /// `max_age` past its load time. An optional `fetcher` makes `get`
    /// self-populating.
    pub fn new(maximum_size: usize, max_age: Duration, fetcher: Option<Fetcher<K, V>>) -> Self {
        Self {
            cache: DashMap::new(),
            maximum_size,
            max_age,
            next_generation: AtomicU64::new(1),
            fetcher,
            flush_handler: RwLock::new(None),
        }
    }

    /// Install the handler that runs for flushed values.
    pub fn set_flush_handler(&self, handler: FlushHandler<K, V>) {
        *self.flush_handler.write() = Some(handler);
    }

    fn flush(&self, key: &K, value: &V) {
        if let Some(handler) = self.flush_handler.read().as_ref() {
            handler(key, value);
        }
    }

    fn bump_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or replace an entry, evicting the entry with the oldest
    /// generation first when the cache is at capacity.
    pub fn add(&self, key: K, value: V) {
        while self.cache.len() >= self.maximum_size && !self.cache.contains_key(&key) {
            // Evict whichever entry has gone longest without a touch. Under
            // concurrent mutation the victim may vanish before removal; just
            // scan again.
            let victim = self
                .cache
                .iter()
                .min_by_key(|entry| entry.value().generation)
                .map(|entry| entry.key().clone());
            match victim {
                Some(victim_key) => {
                    if let Some((k, stamped)) = self.cache.remove(&victim_key) {
                        trace!(evicted = self.cache.len(), "cache at capacity, evicting oldest entry");
                        self.flush(&k, &stamped.value);
                    }
                }
                None => break,
            }
        }
        let stamped = TimestampedValue {
            value,
            when_loaded: Instant::now(),
            generation: self.bump_generation(),
        };
        if let Some(old) = self.cache.insert(key.clone(), stamped) {
            self.flush(&key, &old.value);
        }
    }

    /// Look up a fresh entry, refreshing its generation on hit. A stale entry
    /// is removed, flushed, and reported as a miss.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let expired = match self.cache.get_mut(key) {
            Some(mut entry) => {
                let stamped = entry.value_mut();
                if stamped.when_loaded.elapsed() > self.max_age {
                    true
                } else {
                    stamped.generation = self.bump_generation();
                    return Some(stamped.value.clone());
                }
            }
            None => return None,
        };
        if expired {
            if let Some((k, stamped)) = self.cache.remove(key) {
                self.flush(&k, &stamped.value);
            }
        }
        None
    }

    /// Look up an entry, loading it through the fetcher on a miss.
    /// Callers without a fetcher should use `try_get` and `add` directly.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(value) = self.try_get(key) {
            return Some(value);
        }
        let fetcher = self.fetcher.as_ref()?;
        let value = fetcher(key);
        self.add(key.clone(), value.clone());
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Remove an entry without flushing it; the value is handed back to the
    /// caller, who now owns its cleanup.
    pub fn remove_key(&self, key: &K) -> Option<V> {
        self.cache.remove(key).map(|(_, stamped)| stamped.value)
    }

    /// Drop every entry, flushing each one.
    pub fn clear(&self) {
        let keys: Vec<K> = self.cache.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((k, stamped)) = self.cache.remove(&key) {
                self.flush(&k, &stamped.value);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_add_and_try_get() {
        let cache: Lru<u32, String> = Lru::new(10, Duration::from_secs(60), None);
        cache.add(1, "one".to_string());
        assert_eq!(cache.try_get(&1), Some("one".to_string()));
        assert_eq!(cache.try_get(&2), None);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn test_size_bound_evicts_least_recently_touched() {
        let flushed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cache: Lru<u32, u32> = Lru::new(3, Duration::from_secs(60), None);
        let sink = Arc::clone(&flushed);
        cache.set_flush_handler(Box::new(move |k, _v| sink.lock().push(*k)));

        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(3, 30);
        // Touch 1 so 2 becomes the oldest.
        assert_eq!(cache.try_get(&1), Some(10));
        cache.add(4, 40);

        assert_eq!(cache.count(), 3);
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&1));
        assert!(cache.contains_key(&4));
        assert_eq!(*flushed.lock(), vec![2]);
    }

    #[test]
    fn test_stale_entry_flushed_on_read() {
        let flush_count = Arc::new(AtomicUsize::new(0));
        let cache: Lru<u32, u32> = Lru::new(10, Duration::from_millis(0), None);
        let counter = Arc::clone(&flush_count);
        cache.set_flush_handler(Box::new(move |_k, _v| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        cache.add(1, 10);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.try_get(&1), None);
        assert_eq!(cache.count(), 0);
        assert_eq!(flush_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_with_fetcher_populates() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let cache: Lru<u32, u32> = Lru::new(
            10,
            Duration::from_secs(60),
            Some(Box::new(move |k| {
                counter.fetch_add(1, Ordering::SeqCst);
                k * 2
            })),
        );

        assert_eq!(cache.get(&21), Some(42));
        assert_eq!(cache.get(&21), Some(42));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_key_does_not_flush() {
        let flush_count = Arc::new(AtomicUsize::new(0));
        let cache: Lru<u32, u32> = Lru::new(10, Duration::from_secs(60), None);
        let counter = Arc::clone(&flush_count);
        cache.set_flush_handler(Box::new(move |_k, _v| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        cache.add(1, 10);
        assert_eq!(cache.remove_key(&1), Some(10));
        assert_eq!(flush_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_flushes_everything() {
        let flush_count = Arc::new(AtomicUsize::new(0));
        let cache: Lru<u32, u32> = Lru::new(10, Duration::from_secs(60), None);
        let counter = Arc::clone(&flush_count);
        cache.set_flush_handler(Box::new(move |_k, _v| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        cache.add(1, 10);
        cache.add(2, 20);
        cache.add(3, 30);
        cache.clear();
        assert_eq!(cache.count(), 0);
        assert_eq!(flush_count.load(Ordering::SeqCst), 3);
    }
}
