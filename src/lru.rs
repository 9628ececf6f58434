//! Bounded, recency-ordered map used for the digest cache and the decision
//! memo.

use std::borrow::Borrow;
use std::hash::Hash;

use indexmap::IndexMap;

/// A capacity-evicting map. The least recently used entry is evicted when an
/// insert would exceed the capacity; both [`get`](LruMap::get) and
/// [`insert`](LruMap::insert) count as a use.
///
/// A capacity of zero disables caching entirely.
///
/// Entries are kept in recency order in one `IndexMap`, so a hit on an older
/// entry or an eviction shifts the entries behind it: both are linear in the
/// number of cached entries. The configured `cache-size` bounds that cost.
#[derive(Debug, Clone)]
pub struct LruMap<K, V> {
    entries: IndexMap<K, V>,
    capacity: usize,
}

impl<K: Hash + Eq, V> LruMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Looks up `key` and marks it as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        if index != last {
            self.entries.move_index(index, last);
        }
        self.entries.get_index(last).map(|(_, value)| value)
    }

    /// Looks up `key` without touching its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces `key`, making it the most recently used entry.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    /// Iterates from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
