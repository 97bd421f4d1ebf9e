/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the master and the storage nodes, for logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::time::SystemTime;

use crate::registration::NodeInfo;
use crate::ring::Registration;
use crate::types::{Decision, Key, NodeID};

// Events emitted by the master.

pub struct RegisterNodeEvent {
    pub timestamp: SystemTime,
    pub node: NodeInfo,
    pub registration: Registration,
    pub registered: usize,
    pub expected: usize,
}

pub struct CollectVotesEvent {
    pub timestamp: SystemTime,
    pub key: Key,
    pub is_delete: bool,
    pub ready_votes: usize,
    pub decision: Decision,
}

pub struct AnnounceDecisionEvent {
    pub timestamp: SystemTime,
    pub key: Key,
    pub decision: Decision,
}

pub struct ReceiveAckEvent {
    pub timestamp: SystemTime,
    pub origin: NodeID,
    pub decision: Decision,
    pub attempts: u32,
}

// Events emitted by the storage nodes.

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub node: NodeID,
    pub key: Key,
    pub is_delete: bool,
    pub ready: bool,
}

pub struct ApplyDecisionEvent {
    pub timestamp: SystemTime,
    pub node: NodeID,
    pub decision: Decision,
    /// Key of the pending operation the decision was applied to, if there was one.
    pub key: Option<Key>,
}

pub struct RecoverEvent {
    pub timestamp: SystemTime,
    pub node: NodeID,
    pub records_replayed: usize,
    pub pending_restored: bool,
}

pub struct CompactLogEvent {
    pub timestamp: SystemTime,
    pub node: NodeID,
    pub records_before: usize,
    pub records_after: usize,
}
