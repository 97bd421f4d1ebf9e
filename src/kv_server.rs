/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The local data of a storage node: a [KVCache] in front of a [Store], kept consistent by writing through.
//!
//! Every operation first takes the cache set lock of its key and, if it needs the store, then the store-wide
//! lock. Taking the locks in this order everywhere rules out deadlock, and holding the set lock across the store
//! access keeps the cache and the store from disagreeing about a key.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cache::KVCache;
use crate::error::KVError;
use crate::store::Store;
use crate::types::{check_key, check_value, Key, Value};

pub struct KVServer<S: Store> {
    cache: KVCache,
    store: Mutex<S>,
}

impl<S: Store> KVServer<S> {
    pub fn new(store: S, cache_num_sets: usize, cache_set_capacity: usize) -> KVServer<S> {
        KVServer {
            cache: KVCache::new(cache_num_sets, cache_set_capacity),
            store: Mutex::new(store),
        }
    }

    pub fn put(&self, key: Key, value: Value) -> Result<(), KVError> {
        check_key(&key)?;
        check_value(&value)?;

        let mut set = self.cache.lock_set(&key);
        self.lock_store().put(key.clone(), value.clone())?;
        set.put(key, value);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Value, KVError> {
        check_key(key)?;

        let mut set = self.cache.lock_set(key);
        if let Some(value) = set.get(key) {
            return Ok(value);
        }
        let value = self.lock_store().get(key)?;
        set.put(key.to_vec(), value.clone());
        Ok(value)
    }

    pub fn del(&self, key: &[u8]) -> Result<(), KVError> {
        check_key(key)?;

        let mut set = self.cache.lock_set(key);
        let mut store = self.lock_store();
        if !store.contains(key) {
            return Err(KVError::NoSuchKey);
        }
        store.del(key)?;
        set.del(key);
        Ok(())
    }

    pub fn has_key(&self, key: &[u8]) -> bool {
        let set = self.cache.lock_set(key);
        set.contains(key) || self.lock_store().contains(key)
    }

    pub fn is_durable(&self) -> bool {
        self.lock_store().is_durable()
    }

    fn lock_store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
