//! TTL cache for collaborator lookups.
//!
//! An explicit service instance injected into callers; entries carry their
//! own expiry and capacity is bounded. Replaces the process-wide mutable
//! map the original flow leaned on.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Get a live entry; expired entries are evicted on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, inserted) = entry.value();
                if inserted.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert, evicting expired entries first when at capacity.
    pub fn put(&self, key: K, value: V) {
        if self.entries.len() >= self.capacity {
            self.evict_expired();
            // Still full of live entries: drop an arbitrary one to stay bounded.
            if self.entries.len() >= self.capacity {
                // Clone the victim key in its own statement so the iterator's
                // shard guard is released before `remove` takes a write lock.
                let victim = self.entries.iter().next().map(|e| e.key().clone());
                if let Some(k) = victim {
                    self.entries.remove(&k);
                }
            }
        }
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
