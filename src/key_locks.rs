/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exclusive locks scoped to a single key, or to a single storage node.
//!
//! The [coordinator](crate::coordinator::Coordinator) holds the lock of a key for a whole transaction on it, and,
//! for writes, the locks of both of the key's replicas too. Locks on different keys are independent: the table
//! mutex is only held to check and mark a key, never while a transaction runs.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::types::Key;

pub struct KeyLocks<K = Key> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K: Eq + Hash> KeyLocks<K> {
    pub fn new() -> KeyLocks<K> {
        KeyLocks {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Block until no one else holds the lock of `key`, then take it. The lock is released when the returned
    /// guard is dropped.
    ///
    /// A thread that holds several locks of one table must have taken them in ascending order.
    pub fn lock<Q>(&self, key: &Q) -> KeyGuard<'_, K>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ToOwned<Owned = K> + ?Sized,
    {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held = self
            .released
            .wait_while(held, |held| held.contains(key))
            .unwrap_or_else(PoisonError::into_inner);
        held.insert(key.to_owned());

        KeyGuard {
            locks: self,
            key: key.to_owned(),
        }
    }

    /// Number of keys currently locked.
    pub fn held(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<K: Eq + Hash> Default for KeyLocks<K> {
    fn default() -> Self {
        KeyLocks::new()
    }
}

pub struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyLocks<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        // Waiters for other keys wake up too and go back to sleep.
        self.locks.released.notify_all();
    }
}
