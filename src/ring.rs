/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consistent-hash ring that maps keys to the pair of storage nodes that replicate them.
//!
//! ## Placement
//!
//! Node identifiers and key hashes ([hash_to_64bit]) share one 64-bit space, ordered as unsigned integers. The
//! primary replica of a key is the node with the smallest identifier greater than or equal to the key's hash,
//! wrapping around to the smallest identifier in the ring. The secondary replica is the primary's successor: the
//! node with the smallest identifier strictly greater than the primary's, again wrapping around.
//!
//! ## Quorum
//!
//! The ring is created expecting a fixed number of nodes. Lookups made before all of them have registered block
//! (on a condition variable, not by spinning) until the last one registers. Nodes that register again under the
//! same identifier, e.g. after a restart, only have their endpoint updated.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::KVError;
use crate::registration::NodeInfo;
use crate::types::{hash_to_64bit, NodeID};

/// Whether a call to [ReplicaRing::register] added a node or refreshed an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Joined,
    Updated,
}

pub struct ReplicaRing {
    num_nodes: usize,
    nodes: Mutex<BTreeMap<NodeID, NodeInfo>>,
    quorum: Condvar,
}

impl ReplicaRing {
    /// Create an empty ring that expects `num_nodes` storage nodes.
    ///
    /// # Panics
    /// `num_nodes` must be at least 2, since every key is replicated on two distinct nodes.
    pub fn new(num_nodes: usize) -> ReplicaRing {
        assert!(num_nodes >= 2, "Programming error: a replica ring needs at least two nodes.");
        ReplicaRing {
            num_nodes,
            nodes: Mutex::new(BTreeMap::new()),
            quorum: Condvar::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of nodes registered so far.
    pub fn len(&self) -> usize {
        self.lock_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_nodes().is_empty()
    }

    /// Whether every expected node has registered.
    pub fn is_complete(&self) -> bool {
        self.lock_nodes().len() >= self.num_nodes
    }

    /// Add `node` to the ring, or update its endpoint if its identifier is already known.
    ///
    /// New identifiers are refused once the ring holds the expected number of nodes.
    pub fn register(&self, node: NodeInfo) -> Result<Registration, KVError> {
        let mut nodes = self.lock_nodes();

        if let Some(existing) = nodes.get_mut(&node.id()) {
            existing.update_endpoint(node.hostname().to_string(), node.port());
            return Ok(Registration::Updated);
        }

        if nodes.len() >= self.num_nodes {
            return Err(KVError::ProtocolViolation(format!(
                "ring is full ({} nodes), cannot register node {}",
                self.num_nodes,
                node.id()
            )));
        }

        nodes.insert(node.id(), node);
        if nodes.len() == self.num_nodes {
            self.quorum.notify_all();
        }
        Ok(Registration::Joined)
    }

    /// The (primary, secondary) replicas of `key`. Blocks until the ring is complete.
    pub fn replicas_for(&self, key: &[u8]) -> (NodeInfo, NodeInfo) {
        let nodes = self.wait_for_quorum();
        let primary = Self::ceiling(&nodes, hash_to_64bit(key));
        let secondary = Self::higher(&nodes, primary.id());
        (primary.clone(), secondary.clone())
    }

    /// The node with the smallest identifier `>= hash`, wrapping around. Blocks until the ring is complete.
    pub fn first_replica(&self, hash: u64) -> NodeInfo {
        let nodes = self.wait_for_quorum();
        Self::ceiling(&nodes, hash).clone()
    }

    /// The node with the smallest identifier `> node.id()`, wrapping around. Blocks until the ring is complete.
    pub fn successor(&self, node: &NodeInfo) -> NodeInfo {
        let nodes = self.wait_for_quorum();
        Self::higher(&nodes, node.id()).clone()
    }

    /// Wait at most `timeout` for the ring to become complete. Returns whether it did.
    pub fn wait_for_quorum_timeout(&self, timeout: Duration) -> bool {
        let nodes = self.lock_nodes();
        let (nodes, _) = self
            .quorum
            .wait_timeout_while(nodes, timeout, |nodes| nodes.len() < self.num_nodes)
            .unwrap_or_else(PoisonError::into_inner);
        nodes.len() >= self.num_nodes
    }

    fn wait_for_quorum(&self) -> MutexGuard<'_, BTreeMap<NodeID, NodeInfo>> {
        let nodes = self.lock_nodes();
        self.quorum
            .wait_while(nodes, |nodes| nodes.len() < self.num_nodes)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_nodes(&self) -> MutexGuard<'_, BTreeMap<NodeID, NodeInfo>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Safety: only called on a complete, hence non-empty, ring.
    fn ceiling(nodes: &BTreeMap<NodeID, NodeInfo>, hash: u64) -> &NodeInfo {
        nodes
            .range((Included(NodeID::new(hash)), Unbounded))
            .next()
            .or_else(|| nodes.iter().next())
            .map(|(_, node)| node)
            .expect("Programming error: lookup on an empty replica ring.")
    }

    fn higher(nodes: &BTreeMap<NodeID, NodeInfo>, id: NodeID) -> &NodeInfo {
        nodes
            .range((Excluded(id), Unbounded))
            .next()
            .or_else(|| nodes.iter().next())
            .map(|(_, node)| node)
            .expect("Programming error: lookup on an empty replica ring.")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn node(id: u64) -> NodeInfo {
        NodeInfo::new(NodeID::new(id), "localhost".to_string(), 8000)
    }

    fn ring_of(ids: &[u64]) -> ReplicaRing {
        let ring = ReplicaRing::new(ids.len());
        for id in ids {
            ring.register(node(*id)).unwrap();
        }
        ring
    }

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(hash_to_64bit(b""), 1125899906842597);
        assert_eq!(hash_to_64bit(b"a"), 34902897112120604);
        assert_eq!(hash_to_64bit(b"pkey0"), 7096547112162794844);
    }

    #[test]
    fn identifiers_are_ordered_as_unsigned() {
        // As signed integers, u64::MAX - 1 would be -2 and sort first.
        let ring = ring_of(&[u64::MAX - 1, 10, 1 << 63]);

        assert_eq!(ring.first_replica(11).id(), NodeID::new(1 << 63));
        assert_eq!(ring.first_replica((1 << 63) + 1).id(), NodeID::new(u64::MAX - 1));
        assert_eq!(ring.first_replica(u64::MAX).id(), NodeID::new(10));
        assert_eq!(ring.first_replica(10).id(), NodeID::new(10));
    }

    #[test]
    fn secondary_is_the_circular_successor() {
        let ring = ring_of(&[100, 200, 300]);

        assert_eq!(ring.successor(&node(100)).id(), NodeID::new(200));
        assert_eq!(ring.successor(&node(300)).id(), NodeID::new(100));

        for key in [&b"a"[..], b"pkey0", b"some longer key", b"\x00"] {
            let (primary, secondary) = ring.replicas_for(key);
            assert_ne!(primary.id(), secondary.id());
            assert_eq!(primary.id(), ring.first_replica(hash_to_64bit(key)).id());
            assert_eq!(secondary.id(), ring.successor(&primary).id());
        }
    }

    #[test]
    fn re_registration_updates_endpoint_only() {
        let ring = ring_of(&[1, 2]);
        let outcome = ring
            .register(NodeInfo::new(NodeID::new(1), "otherhost".to_string(), 9999))
            .unwrap();

        assert_eq!(outcome, Registration::Updated);
        assert_eq!(ring.len(), 2);
        let first = ring.first_replica(0);
        assert_eq!(first.id(), NodeID::new(1));
        assert_eq!(first.hostname(), "otherhost");
        assert_eq!(first.port(), 9999);
    }

    #[test]
    fn extra_nodes_are_refused() {
        let ring = ring_of(&[1, 2]);
        assert!(matches!(ring.register(node(3)), Err(KVError::ProtocolViolation(_))));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn lookups_wait_for_quorum() {
        let ring = Arc::new(ReplicaRing::new(2));
        ring.register(node(5)).unwrap();
        assert!(!ring.wait_for_quorum_timeout(Duration::from_millis(20)));

        let lookup = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.replicas_for(b"key"))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!lookup.is_finished());

        ring.register(node(7)).unwrap();
        let (primary, secondary) = lookup.join().unwrap();
        assert_ne!(primary.id(), secondary.id());
        assert!(ring.is_complete());
    }
}
