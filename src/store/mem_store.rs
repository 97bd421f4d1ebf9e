/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A simple, volatile, in-memory implementation of [`Store`].

use std::collections::HashMap;

use crate::error::KVError;
use crate::types::{Key, Value};

use super::Store;

#[derive(Clone, Debug, Default)]
pub struct MemStore(HashMap<Key, Value>);

impl MemStore {
    /// Create a new, empty `MemStore`.
    pub fn new() -> MemStore {
        MemStore(HashMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Store for MemStore {
    fn put(&mut self, key: Key, value: Value) -> Result<(), KVError> {
        self.0.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Value, KVError> {
        self.0.get(key).cloned().ok_or(KVError::NoSuchKey)
    }

    fn del(&mut self, key: &[u8]) -> Result<(), KVError> {
        self.0.remove(key).map(|_| ()).ok_or(KVError::NoSuchKey)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    fn is_durable(&self) -> bool {
        false
    }
}
