/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence for the key-value pairs a storage node holds.
//!
//! A storage node keeps its data in a [Store], fronted by a [cache](crate::cache::KVCache) inside a
//! [KVServer](crate::kv_server::KVServer). Two implementations are provided: the volatile [MemStore], whose
//! contents are rebuilt from the write-ahead log on every restart, and the durable [FileStore].

pub mod file_store;

pub mod mem_store;

pub use file_store::FileStore;
pub use mem_store::MemStore;

use crate::error::KVError;
use crate::types::{Key, Value};

pub trait Store: Send + 'static {
    fn put(&mut self, key: Key, value: Value) -> Result<(), KVError>;

    /// Get the value of `key`, or [KVError::NoSuchKey].
    fn get(&self, key: &[u8]) -> Result<Value, KVError>;

    /// Remove `key`, or fail with [KVError::NoSuchKey] if it is absent.
    fn del(&mut self, key: &[u8]) -> Result<(), KVError>;

    fn contains(&self, key: &[u8]) -> bool;

    /// Whether writes survive a restart of the process.
    ///
    /// Only a node with a durable store may discard completed transactions from its write-ahead log, since a
    /// volatile store is rebuilt from the log alone.
    fn is_durable(&self) -> bool;
}

impl Store for Box<dyn Store> {
    fn put(&mut self, key: Key, value: Value) -> Result<(), KVError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Value, KVError> {
        (**self).get(key)
    }

    fn del(&mut self, key: &[u8]) -> Result<(), KVError> {
        (**self).del(key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        (**self).contains(key)
    }

    fn is_durable(&self) -> bool {
        (**self).is_durable()
    }
}
