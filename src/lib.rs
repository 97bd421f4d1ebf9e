/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A replicated key-value store.
//!
//! A [master](master::Master) accepts client requests and stores every key on two of a fixed set of
//! [storage nodes](node::StorageNode), chosen by consistent hashing on a [replica ring](ring::ReplicaRing).
//! Writes reach both replicas or neither through two-phase commit: the master runs the
//! [coordinator](coordinator::Coordinator) side of the protocol, and each storage node runs a
//! [participant](participant::Participant) backed by a [write-ahead log](wal::WriteAheadLog) from which it
//! recovers after a crash.

pub mod cache;

pub mod client;

pub mod config;

pub mod coordinator;

pub mod error;

pub mod events;

pub mod key_locks;

pub mod kv_server;

pub(crate) mod logging;

pub mod master;

pub mod messages;

pub mod networking;

pub mod node;

pub mod participant;

pub mod registration;

pub mod ring;

pub mod server;

pub mod store;

pub mod thread_pool;

pub mod types;

pub mod wal;
