//! A key/value store with per-entry expiration and eviction on read.

use std::collections::HashMap;
use std::hash::Hash;

use crate::clock::{Clock, Seconds};

/// `store`/`get` with lazy eviction: expired entries are dropped the next time they're touched,
/// not proactively swept. Behavior, not implementation strategy, is the contract -- a heap-backed
/// priority queue of expirations would satisfy it equally well.
#[derive(Debug)]
pub struct TimedStore<K, V> {
    entries: HashMap<K, (V, Seconds)>,
}

impl<K, V> Default for TimedStore<K, V> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash, V> TimedStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes `k`'s value and expiration.
    pub fn store(&mut self, k: K, v: V, expiration: Seconds) {
        self.entries.insert(k, (v, expiration));
    }

    /// Returns the live value and its expiration, evicting it first if it has already expired.
    pub fn get(&mut self, k: &K, clock: &dyn Clock) -> Option<(&V, Seconds)> {
        let now = clock.now();
        if matches!(self.entries.get(k), Some((_, expiration)) if *expiration <= now) {
            self.entries.remove(k);
        }
        self.entries.get(k).map(|(v, expiration)| (v, *expiration))
    }

    /// Removes `k` unconditionally, live or not.
    pub fn remove(&mut self, k: &K) -> Option<(V, Seconds)> {
        self.entries.remove(k)
    }

    /// Drops every entry whose expiration has passed.
    pub fn evict_expired(&mut self, clock: &dyn Clock) {
        let now = clock.now();
        self.entries.retain(|_, (_, expiration)| *expiration > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
