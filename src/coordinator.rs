/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The master's side of two-phase commit.
//!
//! ## Writes
//!
//! A write (PUT or DEL) of a key is carried out on the key's two [replicas](crate::ring::ReplicaRing) while
//! holding the key's [lock](crate::key_locks::KeyLocks) and the locks of both replicas, in two phases:
//! 1. **Collect votes**: the proposal is sent to both replicas at once, with one attempt each. A replica votes
//!    READY only by replying READY within the request timeout. Any other outcome (an error reply, a timeout, a
//!    connection failure) counts as a NO. The decision is COMMIT if both replicas voted READY, and ABORT
//!    otherwise.
//! 2. **Announce the decision**: the decision is sent to both replicas at once, and each replica is retried until
//!    it acknowledges it. Retries are spaced by the configured retry interval plus a random jitter.
//!
//! A storage node holds at most one pending operation, and decisions do not name the transaction they belong to,
//! so two writes that share a replica must not overlap even when their keys differ. Replica locks are taken in
//! ascending [NodeID] order, after the key lock. Writes whose replica pairs are disjoint run in parallel.
//!
//! On COMMIT, the master's read cache is updated before the key's lock is released. On ABORT, the write fails
//! with the reason given by the first replica that explicitly rejected the proposal, or with
//! [KVError::CouldNotCompleteWrite] if none did.
//!
//! ## Reads
//!
//! A read of a key is served from the read cache if possible. Otherwise, both replicas are asked at once and the
//! primary's value is preferred. Successful reads fill the cache.

use std::thread;
use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::cache::KVCache;
use crate::config::MasterConfiguration;
use crate::error::{KVError, SUCCESS};
use crate::events::{AnnounceDecisionEvent, CollectVotesEvent, ReceiveAckEvent};
use crate::key_locks::KeyLocks;
use crate::logging::{first_seven_base64_chars, Logger};
use crate::messages::{KVMessage, MessageType};
use crate::networking::Network;
use crate::registration::NodeInfo;
use crate::ring::{Registration, ReplicaRing};
use crate::types::{check_key, check_value, Decision, Key, NodeID, Operation, Value};

pub struct Coordinator<N: Network> {
    ring: ReplicaRing,
    cache: KVCache,
    key_locks: KeyLocks,
    replica_locks: KeyLocks<NodeID>,
    network: N,
    request_timeout: Duration,
    retry_interval: Duration,
    log_events: bool,
}

/// A replica's answer to a proposal.
#[derive(Debug)]
enum Vote {
    Ready,
    /// The replica replied, but not with READY.
    Rejected(KVError),
    /// No reply arrived in time.
    Missing,
}

impl<N: Network> Coordinator<N> {
    pub fn new(network: N, configuration: &MasterConfiguration) -> Coordinator<N> {
        Coordinator {
            ring: ReplicaRing::new(configuration.num_nodes),
            cache: KVCache::new(configuration.cache_num_sets, configuration.cache_set_capacity),
            key_locks: KeyLocks::new(),
            replica_locks: KeyLocks::new(),
            network,
            request_timeout: configuration.request_timeout,
            retry_interval: configuration.retry_interval,
            log_events: configuration.log_events,
        }
    }

    pub fn ring(&self) -> &ReplicaRing {
        &self.ring
    }

    pub fn register(&self, node: NodeInfo) -> Result<Registration, KVError> {
        self.ring.register(node)
    }

    pub fn put(&self, key: Key, value: Value) -> Result<(), KVError> {
        self.perform_write(key, Some(value), false)
    }

    pub fn del(&self, key: Key) -> Result<(), KVError> {
        self.perform_write(key, None, true)
    }

    pub fn get(&self, key: Key) -> Result<Value, KVError> {
        self.perform_read(key)
    }

    /// Write `value` to `key`, or delete `key` if `is_delete`, on both of its replicas, or on neither.
    ///
    /// Blocks until every expected storage node has registered.
    pub fn perform_write(&self, key: Key, value: Option<Value>, is_delete: bool) -> Result<(), KVError> {
        check_key(&key)?;
        let operation = if is_delete {
            Operation::Del(key)
        } else {
            let value = value.ok_or(KVError::InvalidValue)?;
            check_value(&value)?;
            Operation::Put(key, value)
        };

        let _key_guard = self.key_locks.lock(operation.key());
        let (primary, secondary) = self.ring.replicas_for(operation.key());
        let replicas = [&primary, &secondary];
        let mut replica_ids = replicas.map(NodeInfo::id);
        replica_ids.sort();
        let _replica_guards = replica_ids.map(|node_id| self.replica_locks.lock(&node_id));

        let votes = self.collect_votes(replicas, &operation);
        let ready_votes = votes.iter().filter(|vote| matches!(vote, Vote::Ready)).count();
        let decision = if ready_votes == replicas.len() {
            Decision::Commit
        } else {
            Decision::Abort
        };

        if self.log_events {
            CollectVotesEvent::get_logger()(&CollectVotesEvent {
                timestamp: SystemTime::now(),
                key: operation.key().clone(),
                is_delete: operation.is_delete(),
                ready_votes,
                decision,
            });
        }

        let rejection = votes.into_iter().find_map(|vote| match vote {
            Vote::Rejected(err) => Some(err),
            _ => None,
        });

        self.announce_decision(replicas, operation.key(), decision, rejection.as_ref());

        match decision {
            Decision::Commit => {
                match operation {
                    Operation::Put(key, value) => self.cache.put(key, value),
                    Operation::Del(key) => {
                        self.cache.del(&key);
                    }
                }
                Ok(())
            }
            Decision::Abort => Err(rejection.unwrap_or(KVError::CouldNotCompleteWrite)),
        }
    }

    /// Read the value of `key`. Blocks until every expected storage node has registered.
    pub fn perform_read(&self, key: Key) -> Result<Value, KVError> {
        check_key(&key)?;

        let _key_guard = self.key_locks.lock(&key);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let (primary, secondary) = self.ring.replicas_for(&key);
        let request = KVMessage::get_request(key.clone());
        let values = thread::scope(|s| {
            let from_primary = s.spawn(|| self.get_from(&primary, &request));
            let from_secondary = s.spawn(|| self.get_from(&secondary, &request));
            [
                from_primary.join().unwrap_or(None),
                from_secondary.join().unwrap_or(None),
            ]
        });

        let value = values.into_iter().flatten().next().ok_or(KVError::NoSuchKey)?;
        self.cache.put(key, value.clone());
        Ok(value)
    }

    /// Serve one request from a client. Always produces a reply.
    pub fn handle_client_request(&self, request: KVMessage) -> KVMessage {
        let msg_type = request.msg_type();
        let (key, value) = request.into_key_value();
        let Some(key) = key else {
            return KVMessage::error_response(&KVError::InvalidFormat);
        };

        let result = match msg_type {
            MessageType::PutRequest => self
                .perform_write(key, value, false)
                .map(|()| KVMessage::message_response(SUCCESS)),
            MessageType::DelRequest => self
                .perform_write(key, None, true)
                .map(|()| KVMessage::message_response(SUCCESS)),
            MessageType::GetRequest => self
                .perform_read(key.clone())
                .map(|value| KVMessage::value_response(key, value)),
            _ => Err(KVError::InvalidFormat),
        };
        result.unwrap_or_else(|err| KVMessage::error_response(&err))
    }

    fn collect_votes(&self, replicas: [&NodeInfo; 2], operation: &Operation) -> [Vote; 2] {
        let request = match operation {
            Operation::Put(key, value) => KVMessage::put_request(key.clone(), value.clone()),
            Operation::Del(key) => KVMessage::del_request(key.clone()),
        };

        thread::scope(|s| {
            let handles = replicas.map(|replica| {
                let request = &request;
                s.spawn(move || self.request_vote(replica, request))
            });
            handles.map(|handle| {
                handle
                    .join()
                    .unwrap_or(Vote::Missing)
            })
        })
    }

    fn request_vote(&self, replica: &NodeInfo, request: &KVMessage) -> Vote {
        match self.network.request(replica, request, self.request_timeout) {
            Ok(reply) if reply.msg_type() == MessageType::Ready => Vote::Ready,
            Ok(reply) => {
                let reason = reply.response_error().unwrap_or(KVError::InvalidFormat);
                log::debug!("Node {} voted NO: {}", replica.id(), reason);
                Vote::Rejected(reason)
            }
            Err(err) => {
                log::warn!("No vote from node {}: {}", replica.id(), err);
                Vote::Missing
            }
        }
    }

    fn announce_decision(
        &self,
        replicas: [&NodeInfo; 2],
        key: &Key,
        decision: Decision,
        rejection: Option<&KVError>,
    ) {
        let announcement = match decision {
            Decision::Commit => KVMessage::commit(),
            Decision::Abort => KVMessage::abort(rejection.map(|err| err.to_string())),
        };

        // Both deliveries are joined when the scope ends.
        thread::scope(|s| {
            for replica in replicas {
                let announcement = &announcement;
                s.spawn(move || self.deliver_decision(replica, announcement, decision));
            }
        });

        if self.log_events {
            AnnounceDecisionEvent::get_logger()(&AnnounceDecisionEvent {
                timestamp: SystemTime::now(),
                key: key.clone(),
                decision,
            });
        }
    }

    // Blocks until `replica` acknowledges `announcement`.
    fn deliver_decision(&self, replica: &NodeInfo, announcement: &KVMessage, decision: Decision) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.network.request(replica, announcement, self.request_timeout) {
                Ok(reply) if reply.msg_type() == MessageType::Ack => {
                    if self.log_events {
                        ReceiveAckEvent::get_logger()(&ReceiveAckEvent {
                            timestamp: SystemTime::now(),
                            origin: replica.id(),
                            decision,
                            attempts,
                        });
                    }
                    return;
                }
                Ok(reply) => log::warn!(
                    "Node {} answered {:?} with {:?} instead of an ACK, retrying",
                    replica.id(),
                    decision,
                    reply.response_error().map(|err| err.to_string()),
                ),
                Err(err) => log::warn!(
                    "Could not deliver {:?} to node {} (attempt {}): {}",
                    decision,
                    replica.id(),
                    attempts,
                    err
                ),
            }
            thread::sleep(self.retry_delay());
        }
    }

    fn retry_delay(&self) -> Duration {
        let jitter_ceiling = (self.retry_interval.as_millis() as u64 / 2).max(1);
        self.retry_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ceiling))
    }

    fn get_from(&self, replica: &NodeInfo, request: &KVMessage) -> Option<Value> {
        match self.network.request(replica, request, self.request_timeout) {
            Ok(reply) => {
                let (_, value) = reply.into_key_value();
                if value.is_none() {
                    log::debug!(
                        "Node {} has no value for key {}",
                        replica.id(),
                        request.key().map(|key| first_seven_base64_chars(key)).unwrap_or_default()
                    );
                }
                value
            }
            Err(err) => {
                log::warn!("Could not read from node {}: {}", replica.id(), err);
                None
            }
        }
    }
}
