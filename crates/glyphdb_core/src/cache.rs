//! Bounded time-to-live cache.
//!
//! Owned by whoever needs it (typically a response layer above the
//! engine). Entries expire `ttl` after insertion; when the cache is full
//! the oldest insertion is evicted first.

use crate::clock::{duration_millis, Clock};
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

struct Entry<V> {
    value: V,
    inserted: Timestamp,
    order: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    by_age: BTreeMap<u64, K>,
    next_order: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.by_age.remove(&entry.order);
        Some(entry)
    }
}

/// A thread-safe cache whose entries expire after a fixed TTL.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    clock: Arc<dyn Clock>,
    ttl: i64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                by_age: BTreeMap::new(),
                next_order: 0,
            }),
            clock,
            ttl: duration_millis(ttl),
            capacity: capacity.max(1),
        }
    }

    fn expired(&self, inserted: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(inserted) >= self.ttl
    }

    /// Returns a live entry. An expired entry is dropped on the way.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let inserted = inner.entries.get(key)?.inserted;
        if self.expired(inserted, now) {
            inner.remove(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts or replaces an entry, restarting its TTL. Returns the
    /// previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let previous = inner.remove(&key).map(|e| e.value);

        while inner.entries.len() >= self.capacity {
            let Some((_, oldest)) = inner.by_age.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }

        let order = inner.next_order;
        inner.next_order += 1;
        inner.by_age.insert(order, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                order,
            },
        );
        previous
    }

    /// Removes an entry, live or not.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key).map(|e| e.value)
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let stale: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.expired(e.inserted, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            inner.remove(key);
        }
        stale.len()
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_age.clear();
    }
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.inner.lock().entries.len())
            .field("ttl_ms", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}
