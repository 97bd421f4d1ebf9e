/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert types shared by the master and the storage nodes, and the validation rules for keys and values.
//!
//! Keys and values are opaque byte strings. The size rules are checked as early as possible: at the
//! [coordinator](crate::coordinator) before any network traffic, and again at each
//! [participant](crate::participant) before anything is written to its log.

use std::fmt::{self, Display, Formatter};

use crate::error::KVError;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// Maximum length of a key, in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// Maximum length of a value, in bytes.
pub const MAX_VALUE_SIZE: usize = 256 * 1024;

const HASH_SEED: u64 = 1125899906842597;
const HASH_MULTIPLIER: u64 = 31;

/// Identifier of a storage node, and its position on the [replica ring](crate::ring::ReplicaRing).
///
/// Node identifiers and key hashes live in the same 64-bit space and are always ordered as unsigned integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeID(u64);

impl NodeID {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for NodeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Hash a byte string into the 64-bit ring space.
///
/// Polynomial hash with a fixed seed, accumulated per byte with wrapping arithmetic.
pub fn hash_to_64bit(bytes: &[u8]) -> u64 {
    bytes.iter().fold(HASH_SEED, |h, byte| {
        h.wrapping_mul(HASH_MULTIPLIER).wrapping_add(*byte as u64)
    })
}

pub fn check_key(key: &[u8]) -> Result<(), KVError> {
    if key.is_empty() {
        Err(KVError::InvalidKey)
    } else if key.len() > MAX_KEY_SIZE {
        Err(KVError::OversizedKey)
    } else {
        Ok(())
    }
}

pub fn check_value(value: &[u8]) -> Result<(), KVError> {
    if value.is_empty() {
        Err(KVError::InvalidValue)
    } else if value.len() > MAX_VALUE_SIZE {
        Err(KVError::OversizedValue)
    } else {
        Ok(())
    }
}

/// A write proposed to a pair of replicas in phase one of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Put(Key, Value),
    Del(Key),
}

impl Operation {
    pub fn key(&self) -> &Key {
        match self {
            Operation::Put(key, _) => key,
            Operation::Del(key) => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Del(_))
    }
}

/// Outcome of phase one of a transaction, announced to both replicas in phase two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}
