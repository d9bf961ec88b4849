//! Generic interning cache.
//!
//! Identity values recur across millions of messages; canonicalizing each
//! newly built value through a concurrent find-or-create table keeps memory
//! bounded and makes `Arc::ptr_eq` a valid fast path for equality checks.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// Concurrent find-or-create table mapping structural keys to shared values.
pub struct Interner<K, V> {
    cache: DashMap<K, Arc<V>>,
}

impl<K: Eq + Hash, V> Interner<K, V> {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Return the canonical instance for `key`, building it with `factory`
    /// on first sight. Concurrent callers with the same key observe the same
    /// `Arc`.
    pub fn find_or_create(&self, key: K, factory: impl FnOnce() -> V) -> Arc<V> {
        self.cache
            .entry(key)
            .or_insert_with(|| Arc::new(factory()))
            .clone()
    }

    /// Drop every cached instance. Outstanding `Arc`s stay valid; subsequent
    /// lookups build fresh canonical instances. Intended for teardown and
    /// test isolation.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<K: Eq + Hash, V> Default for Interner<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
