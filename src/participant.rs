/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The storage node's side of two-phase commit.
//!
//! A [Participant] answers the requests the master sends a storage node:
//! - **GET**: read from the local data. Never logged.
//! - **PUT / DEL** (phase one): check the proposed operation, log it, remember it as the pending operation, and
//!   vote READY. A proposal that fails its checks is answered with an error response, which the master counts
//!   as a NO vote; it is neither logged nor remembered.
//! - **COMMIT / ABORT** (phase two): log the decision, apply or discard the pending operation, and reply ACK.
//!   Once the ACK has been sent, it is logged too (see [Participant::response_sent]).
//!
//! A node takes part in at most one transaction at a time. Every record is flushed to the
//! [write-ahead log](crate::wal) before the reply that depends on it is sent, so a node that crashes and
//! restarts with [Participant::recover] keeps every promise it made.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::error::KVError;
use crate::events::{ApplyDecisionEvent, CompactLogEvent, RecoverEvent, VoteEvent};
use crate::kv_server::KVServer;
use crate::logging::Logger;
use crate::messages::{KVMessage, MessageType};
use crate::store::Store;
use crate::types::{check_key, check_value, Decision, Operation, NodeID};
use crate::wal::{LogRecord, WriteAheadLog};

pub struct Participant<S: Store> {
    node_id: NodeID,
    kv_server: KVServer<S>,
    transaction: Mutex<TransactionState>,
    compaction_threshold: usize,
    log_events: bool,
}

struct TransactionState {
    wal: WriteAheadLog,
    pending: Option<Operation>,
}

impl<S: Store> Participant<S> {
    /// Rebuild `kv_server` from `wal` and restore the operation that was pending when the node went down.
    ///
    /// The log is compacted once it holds more than `compaction_threshold` records, if `kv_server`'s store is
    /// durable.
    pub fn recover(
        node_id: NodeID,
        kv_server: KVServer<S>,
        wal: WriteAheadLog,
        compaction_threshold: usize,
        log_events: bool,
    ) -> Result<Participant<S>, KVError> {
        let pending = wal.replay(&kv_server)?;

        if log_events {
            RecoverEvent::get_logger()(&RecoverEvent {
                timestamp: SystemTime::now(),
                node: node_id,
                records_replayed: wal.len(),
                pending_restored: pending.is_some(),
            });
        }

        Ok(Participant {
            node_id,
            kv_server,
            transaction: Mutex::new(TransactionState { wal, pending }),
            compaction_threshold,
            log_events,
        })
    }

    pub fn node_id(&self) -> NodeID {
        self.node_id
    }

    pub fn kv_server(&self) -> &KVServer<S> {
        &self.kv_server
    }

    /// The operation this node voted READY on and has not yet seen a decision for.
    pub fn pending(&self) -> Option<Operation> {
        self.lock_transaction().pending.clone()
    }

    /// Serve one request from the master. Always produces a reply.
    pub fn handle(&self, request: &KVMessage) -> KVMessage {
        let result = match request.msg_type() {
            MessageType::GetRequest => self.get(request),
            MessageType::PutRequest | MessageType::DelRequest => self.vote(request),
            MessageType::Commit => self.decide(Decision::Commit),
            MessageType::Abort => self.decide(Decision::Abort),
            _ => Err(KVError::InvalidFormat),
        };
        result.unwrap_or_else(|err| KVMessage::error_response(&err))
    }

    /// Called once `response` has been written back to the master. Logs sent ACKs.
    pub fn response_sent(&self, response: &KVMessage) {
        if response.msg_type() != MessageType::Ack {
            return;
        }

        let mut transaction = self.lock_transaction();
        if let Err(err) = transaction.wal.append_and_flush(LogRecord::Ack) {
            log::warn!("Node {} could not log a sent ACK: {}", self.node_id, err);
            return;
        }

        if transaction.wal.len() > self.compaction_threshold && self.kv_server.is_durable() {
            let records_before = transaction.wal.len();
            match transaction.wal.compact() {
                Ok(_) => {
                    if self.log_events {
                        CompactLogEvent::get_logger()(&CompactLogEvent {
                            timestamp: SystemTime::now(),
                            node: self.node_id,
                            records_before,
                            records_after: transaction.wal.len(),
                        });
                    }
                }
                Err(err) => log::warn!("Node {} could not compact its log: {}", self.node_id, err),
            }
        }
    }

    fn get(&self, request: &KVMessage) -> Result<KVMessage, KVError> {
        let key = request.key().ok_or(KVError::InvalidFormat)?;
        check_key(key)?;
        let value = self.kv_server.get(key)?;
        Ok(KVMessage::value_response(key.clone(), value))
    }

    fn vote(&self, request: &KVMessage) -> Result<KVMessage, KVError> {
        let key = request.key().ok_or(KVError::InvalidFormat)?;
        let is_delete = request.msg_type() == MessageType::DelRequest;

        let result = self.prepare(request).and_then(|operation| {
            let mut transaction = self.lock_transaction();
            if let Some(pending) = &transaction.pending {
                log::warn!(
                    "Node {} received a proposal while another one (key {:?}) is pending",
                    self.node_id,
                    pending.key()
                );
                return Err(KVError::ProtocolViolation(String::from(
                    "another operation is already pending",
                )));
            }
            transaction.wal.append_and_flush(LogRecord::from(&operation))?;
            transaction.pending = Some(operation);
            Ok(())
        });

        if self.log_events {
            VoteEvent::get_logger()(&VoteEvent {
                timestamp: SystemTime::now(),
                node: self.node_id,
                key: key.clone(),
                is_delete,
                ready: result.is_ok(),
            });
        }

        result.map(|()| KVMessage::ready())
    }

    // Check a proposal without touching the log or the pending slot.
    fn prepare(&self, request: &KVMessage) -> Result<Operation, KVError> {
        let key = request.key().ok_or(KVError::InvalidFormat)?;
        check_key(key)?;

        if request.msg_type() == MessageType::DelRequest {
            if !self.kv_server.has_key(key) {
                return Err(KVError::NoSuchKey);
            }
            Ok(Operation::Del(key.clone()))
        } else {
            let value = request.value().ok_or(KVError::InvalidFormat)?;
            check_value(value)?;
            Ok(Operation::Put(key.clone(), value.clone()))
        }
    }

    fn decide(&self, decision: Decision) -> Result<KVMessage, KVError> {
        let mut transaction = self.lock_transaction();

        let Some(operation) = transaction.pending.take() else {
            return self.decide_without_pending(&mut transaction, decision);
        };

        if let Err(err) = transaction.wal.append_and_flush(LogRecord::from(decision)) {
            transaction.pending = Some(operation);
            return Err(err);
        }

        if decision == Decision::Commit {
            let applied = match &operation {
                Operation::Put(key, value) => self.kv_server.put(key.clone(), value.clone()),
                Operation::Del(key) => match self.kv_server.del(key) {
                    Ok(()) | Err(KVError::NoSuchKey) => Ok(()),
                    Err(err) => Err(err),
                },
            };
            if let Err(err) = applied {
                log::error!("Node {} could not apply a committed operation: {}", self.node_id, err);
                // Kept pending so that the master's retry applies it again.
                transaction.pending = Some(operation);
                return Err(err);
            }
        }

        if self.log_events {
            ApplyDecisionEvent::get_logger()(&ApplyDecisionEvent {
                timestamp: SystemTime::now(),
                node: self.node_id,
                decision,
                key: Some(operation.key().clone()),
            });
        }

        Ok(KVMessage::ack())
    }

    fn decide_without_pending(
        &self,
        transaction: &mut TransactionState,
        decision: Decision,
    ) -> Result<KVMessage, KVError> {
        match decision {
            // This node rejected the proposal (or never received it), or the ABORT is a repeated delivery.
            Decision::Abort => {
                log::warn!("Node {} received ABORT with no pending operation", self.node_id);
                transaction.wal.append_and_flush(LogRecord::Abort)?;
            }
            // The ACK for this COMMIT was lost and the master is retrying.
            Decision::Commit if transaction.wal.last_decision() == Some(Decision::Commit) => {
                log::warn!("Node {} received a repeated COMMIT, acknowledging again", self.node_id);
            }
            Decision::Commit => {
                log::warn!("Node {} received COMMIT with no pending operation", self.node_id);
                return Err(KVError::ProtocolViolation(String::from(
                    "commit with no pending operation",
                )));
            }
        }

        if self.log_events {
            ApplyDecisionEvent::get_logger()(&ApplyDecisionEvent {
                timestamp: SystemTime::now(),
                node: self.node_id,
                decision,
                key: None,
            });
        }

        Ok(KVMessage::ack())
    }

    fn lock_transaction(&self) -> MutexGuard<'_, TransactionState> {
        self.transaction.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemStore};

    fn participant(dir: &tempfile::TempDir) -> Participant<MemStore> {
        let wal = WriteAheadLog::open(dir.path().join("node.log")).unwrap();
        Participant::recover(NodeID::new(1), KVServer::new(MemStore::new(), 4, 4), wal, 100, false).unwrap()
    }

    fn reply_to(participant: &Participant<MemStore>, request: KVMessage) -> KVMessage {
        let response = participant.handle(&request);
        participant.response_sent(&response);
        response
    }

    #[test]
    fn commit_applies_the_pending_put() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);

        let vote = reply_to(&node, KVMessage::put_request(b"k".to_vec(), b"v".to_vec()));
        assert_eq!(vote.msg_type(), MessageType::Ready);
        assert!(node.pending().is_some());
        assert_eq!(node.kv_server().get(b"k"), Err(KVError::NoSuchKey));

        let ack = reply_to(&node, KVMessage::commit());
        assert_eq!(ack.msg_type(), MessageType::Ack);
        assert_eq!(node.pending(), None);
        assert_eq!(node.kv_server().get(b"k"), Ok(b"v".to_vec()));

        let get = reply_to(&node, KVMessage::get_request(b"k".to_vec()));
        assert_eq!(get.value(), Some(&b"v".to_vec()));

        let wal = node.lock_transaction();
        assert_eq!(
            wal.wal.entries(),
            &[
                LogRecord::Put {
                    key: b"k".to_vec(),
                    value: b"v".to_vec()
                },
                LogRecord::Commit,
                LogRecord::Ack
            ]
        );
    }

    #[test]
    fn abort_discards_the_pending_operation() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);

        reply_to(&node, KVMessage::put_request(b"k".to_vec(), b"v".to_vec()));
        let ack = reply_to(&node, KVMessage::abort(None));
        assert_eq!(ack.msg_type(), MessageType::Ack);
        assert_eq!(node.pending(), None);
        assert!(!node.kv_server().has_key(b"k"));
    }

    #[test]
    fn invalid_proposals_are_rejected_without_logging() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);

        let reply = node.handle(&KVMessage::put_request(b"k".to_vec(), vec![0; 256 * 1024 + 1]));
        assert_eq!(reply.response_error(), Some(KVError::OversizedValue));

        let reply = node.handle(&KVMessage::del_request(b"absent".to_vec()));
        assert_eq!(reply.response_error(), Some(KVError::NoSuchKey));

        assert_eq!(node.pending(), None);
        assert!(node.lock_transaction().wal.is_empty());
    }

    #[test]
    fn second_proposal_while_pending_is_a_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);

        reply_to(&node, KVMessage::put_request(b"a".to_vec(), b"1".to_vec()));
        let reply = node.handle(&KVMessage::put_request(b"b".to_vec(), b"2".to_vec()));
        assert!(matches!(reply.response_error(), Some(KVError::ProtocolViolation(_))));
        assert_eq!(node.pending(), Some(Operation::Put(b"a".to_vec(), b"1".to_vec())));
    }

    #[test]
    fn decisions_without_a_pending_operation() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);

        // Nothing was ever committed here.
        let reply = node.handle(&KVMessage::commit());
        assert!(matches!(reply.response_error(), Some(KVError::ProtocolViolation(_))));

        // A node that voted NO still acknowledges the ABORT.
        assert_eq!(reply_to(&node, KVMessage::abort(None)).msg_type(), MessageType::Ack);

        // A repeated COMMIT is acknowledged again without reapplying anything.
        reply_to(&node, KVMessage::put_request(b"k".to_vec(), b"v".to_vec()));
        reply_to(&node, KVMessage::commit());
        assert_eq!(reply_to(&node, KVMessage::commit()).msg_type(), MessageType::Ack);
        assert_eq!(node.kv_server().get(b"k"), Ok(b"v".to_vec()));
    }

    #[test]
    fn unexpected_message_types_are_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let node = participant(&dir);
        assert_eq!(node.handle(&KVMessage::ready()).response_error(), Some(KVError::InvalidFormat));
        assert_eq!(node.handle(&KVMessage::register("1@h:1")).response_error(), Some(KVError::InvalidFormat));
    }

    #[test]
    fn restart_restores_pending_and_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let node = participant(&dir);
            reply_to(&node, KVMessage::put_request(b"a".to_vec(), b"1".to_vec()));
            reply_to(&node, KVMessage::commit());
            reply_to(&node, KVMessage::del_request(b"a".to_vec()));
        }

        let node = participant(&dir);
        assert_eq!(node.kv_server().get(b"a"), Ok(b"1".to_vec()));
        assert_eq!(node.pending(), Some(Operation::Del(b"a".to_vec())));

        reply_to(&node, KVMessage::commit());
        assert!(!node.kv_server().has_key(b"a"));
    }

    #[test]
    fn durable_nodes_compact_their_log() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("node.log")).unwrap();
        let kv_server = KVServer::new(FileStore::open(dir.path().join("store.db")).unwrap(), 4, 4);
        let node = Participant::recover(NodeID::new(1), kv_server, wal, 4, false).unwrap();

        for i in 0..5u8 {
            let response = node.handle(&KVMessage::put_request(vec![b'k', i], vec![i + 1]));
            node.response_sent(&response);
            let response = node.handle(&KVMessage::commit());
            node.response_sent(&response);
        }

        assert!(node.lock_transaction().wal.len() <= 4);
        for i in 0..5u8 {
            assert_eq!(node.kv_server().get(&[b'k', i]), Ok(vec![i + 1]));
        }
    }
}
