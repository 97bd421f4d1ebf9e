/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A set-associative, in-memory cache of key-value pairs.
//!
//! Keys are spread over a fixed number of sets by [hash_to_64bit]. Every set has its own mutex and a fixed
//! capacity, and evicts independently of the others using the second-chance ("clock") policy: a lookup marks
//! its entry as referenced, and eviction walks the set's queue in insertion order, giving every referenced
//! entry one more round (clearing the mark) before evicting the first unreferenced one.
//!
//! The cache is only ever an optimisation. A miss is never an error.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{hash_to_64bit, Key, Value};

pub struct KVCache {
    sets: Vec<Mutex<CacheSet>>,
}

impl KVCache {
    /// Create a cache of `num_sets` sets holding at most `max_elems_per_set` entries each.
    ///
    /// # Panics
    /// Both arguments must be non-zero.
    pub fn new(num_sets: usize, max_elems_per_set: usize) -> KVCache {
        assert!(num_sets > 0, "Programming error: a cache needs at least one set.");
        assert!(max_elems_per_set > 0, "Programming error: cache sets need a non-zero capacity.");
        KVCache {
            sets: (0..num_sets)
                .map(|_| Mutex::new(CacheSet::new(max_elems_per_set)))
                .collect(),
        }
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Lock and return the set that `key` belongs to.
    ///
    /// Callers that also need the [store lock](crate::kv_server::KVServer) must take this lock first.
    pub fn lock_set(&self, key: &[u8]) -> MutexGuard<'_, CacheSet> {
        let index = (hash_to_64bit(key) % self.sets.len() as u64) as usize;
        self.sets[index].lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.lock_set(key).get(key)
    }

    pub fn put(&self, key: Key, value: Value) {
        self.lock_set(&key).put(key, value)
    }

    pub fn del(&self, key: &[u8]) -> Option<Value> {
        self.lock_set(key).del(key)
    }
}

/// One set of a [KVCache]. Only reachable through its set lock.
pub struct CacheSet {
    capacity: usize,
    entries: HashMap<Key, CacheEntry>,
    // Insertion order for the clock hand. Entries whose generation no longer matches the live entry were
    // deleted (or deleted and re-inserted) and are skipped.
    queue: VecDeque<(Key, u64)>,
    next_generation: u64,
}

struct CacheEntry {
    value: Value,
    referenced: bool,
    generation: u64,
}

impl CacheSet {
    fn new(capacity: usize) -> CacheSet {
        CacheSet {
            capacity,
            entries: HashMap::with_capacity(capacity),
            queue: VecDeque::with_capacity(capacity),
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Look `key` up, marking its entry as referenced.
    pub fn get(&mut self, key: &[u8]) -> Option<Value> {
        self.entries.get_mut(key).map(|entry| {
            entry.referenced = true;
            entry.value.clone()
        })
    }

    /// Insert or overwrite `key`. Overwriting counts as a reference; inserting into a full set evicts one entry.
    pub fn put(&mut self, key: Key, value: Value) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.referenced = true;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.queue.push_back((key.clone(), generation));
        self.entries.insert(
            key,
            CacheEntry {
                value,
                referenced: false,
                generation,
            },
        );
    }

    /// Remove `key`, returning its value if it was cached.
    pub fn del(&mut self, key: &[u8]) -> Option<Value> {
        let removed = self.entries.remove(key).map(|entry| entry.value);
        if removed.is_some() && self.queue.len() > 2 * self.capacity {
            self.drop_stale_queue_entries();
        }
        removed
    }

    fn evict(&mut self) {
        while let Some((key, generation)) = self.queue.pop_front() {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if entry.generation != generation {
                continue;
            }
            if entry.referenced {
                entry.referenced = false;
                self.queue.push_back((key, generation));
            } else {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn drop_stale_queue_entries(&mut self) {
        let entries = &self.entries;
        self.queue.retain(|(key, generation)| {
            entries
                .get(key)
                .map_or(false, |entry| entry.generation == *generation)
        });
    }
}
