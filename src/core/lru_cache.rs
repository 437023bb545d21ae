//! Weighted LRU cache.
//!
//! Wraps `lru::LruCache` (hash map + recency list, O(1) operations) and adds
//! a per-entry weight with a total capacity. After every operation the sum
//! of weights is <= capacity; inserting evicts least-recently-used entries
//! until the new entry fits.

use log::{trace, warn};
use std::hash::Hash;

/// Weighted LRU cache. `get` promotes, `peek`/`contains` do not.
pub struct LruCache<K: Hash + Eq, V> {
    entries: lru::LruCache<K, (V, usize)>,
    capacity: usize,
    size: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: lru::LruCache::unbounded(),
            capacity,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change capacity, evicting LRU entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_to(capacity);
        self.check_invariant();
    }

    /// Total weight of all entries.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill level in percent (0..=100).
    pub fn percentage(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f32 / self.capacity as f32 * 100.0
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Lookup and promote to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    /// Lookup without touching recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.peek(key).map(|(v, _)| v.clone())
    }

    pub fn add(&mut self, key: K, value: V) -> bool {
        self.add_weighted(key, value, 1)
    }

    /// Insert or replace `key`. Returns `false` when the entry alone is
    /// heavier than the capacity (nothing is inserted then; an existing
    /// value under `key` is kept).
    pub fn add_weighted(&mut self, key: K, value: V, weight: usize) -> bool {
        if weight > self.capacity {
            warn!(
                "LruCache: entry weight {} exceeds capacity {}, rejected",
                weight, self.capacity
            );
            return false;
        }
        if let Some((_, old)) = self.entries.pop(&key) {
            self.size -= old;
        }
        self.evict_to(self.capacity - weight);
        self.entries.put(key, (value, weight));
        self.size += weight;
        self.check_invariant();
        true
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, weight) = self.entries.pop(key)?;
        self.size -= weight;
        Some(value)
    }

    /// Remove every entry matching `pred`; returns the removed weight.
    pub fn remove_if(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, _)| k.clone())
            .collect();
        let mut freed = 0;
        for key in doomed {
            if let Some((_, weight)) = self.entries.pop(&key) {
                freed += weight;
            }
        }
        self.size -= freed;
        freed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// Remove and return the least-recently-used entry with its weight.
    pub fn pop_lru(&mut self) -> Option<(K, V, usize)> {
        let (key, (value, weight)) = self.entries.pop_lru()?;
        self.size -= weight;
        Some((key, value, weight))
    }

    /// Evict until total weight <= `limit`; returns evicted weight.
    fn evict_to(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.size > limit {
            match self.entries.pop_lru() {
                Some((_, (_, weight))) => {
                    self.size -= weight;
                    evicted += weight;
                }
                None => break,
            }
        }
        if evicted > 0 {
            trace!("LruCache: evicted {} units, size {}/{}", evicted, self.size, self.capacity);
        }
        evicted
    }

    #[inline]
    fn check_invariant(&self) {
        debug_assert!(
            self.size <= self.capacity,
            "LruCache weight {} over capacity {}",
            self.size,
            self.capacity
        );
        debug_assert_eq!(
            self.size,
            self.entries.iter().map(|(_, (_, w))| *w).sum::<usize>()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_victim() {
        let mut cache = LruCache::new(3);
        cache.add(1, "a");
        cache.add(2, "b");
        cache.add(3, "c");
        cache.add(4, "d");
        assert!(!cache.contains(&1));
        assert_eq!(cache.keys(), vec![2, 3, 4]);
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_get_promotes_peek_does_not() {
        let mut cache = LruCache::new(3);
        cache.add(1, "a");
        cache.add(2, "b");
        cache.add(3, "c");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.keys(), vec![2, 3, 1]);
        assert_eq!(cache.peek(&2), Some("b"));
        assert_eq!(cache.keys(), vec![2, 3, 1]);
        cache.add(4, "d");
        assert!(!cache.contains(&2));
        assert!(cache.contains(&1));
    }

    #[test]
    fn test_weighted_eviction() {
        let mut cache = LruCache::new(10);
        cache.add_weighted("a", 1, 4);
        cache.add_weighted("b", 2, 4);
        cache.add_weighted("c", 3, 4);
        assert_eq!(cache.keys(), vec!["b", "c"]);
        assert_eq!(cache.size(), 8);
        assert_eq!(cache.percentage(), 80.0);
    }

    #[test]
    fn test_replace_keeps_weight_consistent() {
        let mut cache = LruCache::new(10);
        cache.add_weighted("a", 1, 6);
        cache.add_weighted("a", 2, 3);
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.peek(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oversized_rejected() {
        let mut cache = LruCache::new(5);
        cache.add_weighted("a", 1, 2);
        assert!(!cache.add_weighted("big", 2, 6));
        assert!(!cache.contains(&"big"));
        assert!(cache.contains(&"a"));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_set_capacity_evicts() {
        let mut cache = LruCache::new(4);
        for i in 0..4 {
            cache.add(i, i);
        }
        cache.set_capacity(2);
        assert_eq!(cache.keys(), vec![2, 3]);
        assert_eq!(cache.remove(&3), Some(3));
        assert_eq!(cache.size(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_pop_lru() {
        let mut cache = LruCache::new(10);
        cache.add_weighted("a", 1, 4);
        cache.add_weighted("b", 2, 3);
        cache.get(&"a");
        assert_eq!(cache.pop_lru(), Some(("b", 2, 3)));
        assert_eq!(cache.size(), 4);
        assert_eq!(cache.pop_lru(), Some(("a", 1, 4)));
        assert_eq!(cache.pop_lru(), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_remove_if() {
        let mut cache = LruCache::new(10);
        cache.add_weighted(("x", 1), 0, 2);
        cache.add_weighted(("y", 1), 0, 3);
        cache.add_weighted(("x", 2), 0, 2);
        assert_eq!(cache.remove_if(|k| k.0 == "x"), 4);
        assert_eq!(cache.keys(), vec![("y", 1)]);
        assert_eq!(cache.size(), 3);
    }
}
