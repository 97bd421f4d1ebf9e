/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the `log_events` flag of the
//! [master's](crate::config::MasterConfiguration) or [storage node's](crate::config::NodeConfiguration)
//! configuration.
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed onto
//! a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [Vote](crate::events::VoteEvent) is printed:
//!
//! ```text
//! Vote, 1701329264, 42, cGtleTA, Put, Ready
//! ```
//!
//! In the snippet:
//! - The third value is the identifier of the storage node that voted.
//! - The fourth value is the first seven characters of the Base64 encoding of the key.
//! - The fifth value is the kind of operation proposed.
//! - The sixth value is the vote.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const REGISTER_NODE: &str = "RegisterNode";
pub const COLLECT_VOTES: &str = "CollectVotes";
pub const ANNOUNCE_DECISION: &str = "AnnounceDecision";
pub const RECEIVE_ACK: &str = "ReceiveAck";

pub const VOTE: &str = "Vote";
pub const APPLY_DECISION: &str = "ApplyDecision";
pub const RECOVER: &str = "Recover";
pub const COMPACT_LOG: &str = "CompactLog";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for RegisterNodeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |register_node_event: &RegisterNodeEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}, {}",
                REGISTER_NODE,
                secs_since_unix_epoch(register_node_event.timestamp),
                register_node_event.node,
                register_node_event.registration,
                register_node_event.registered,
                register_node_event.expected
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectVotesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_votes_event: &CollectVotesEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                COLLECT_VOTES,
                secs_since_unix_epoch(collect_votes_event.timestamp),
                first_seven_base64_chars(&collect_votes_event.key),
                operation_name(collect_votes_event.is_delete),
                collect_votes_event.ready_votes,
                collect_votes_event.decision
            )
        };
        Box::new(logger)
    }
}

impl Logger for AnnounceDecisionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |announce_decision_event: &AnnounceDecisionEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                ANNOUNCE_DECISION,
                secs_since_unix_epoch(announce_decision_event.timestamp),
                first_seven_base64_chars(&announce_decision_event.key),
                announce_decision_event.decision
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveAckEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_ack_event: &ReceiveAckEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                RECEIVE_ACK,
                secs_since_unix_epoch(receive_ack_event.timestamp),
                receive_ack_event.origin,
                receive_ack_event.decision,
                receive_ack_event.attempts
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.node,
                first_seven_base64_chars(&vote_event.key),
                operation_name(vote_event.is_delete),
                if vote_event.ready { "Ready" } else { "Reject" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyDecisionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_decision_event: &ApplyDecisionEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                APPLY_DECISION,
                secs_since_unix_epoch(apply_decision_event.timestamp),
                apply_decision_event.node,
                apply_decision_event.decision,
                apply_decision_event
                    .key
                    .as_ref()
                    .map(|key| first_seven_base64_chars(key))
                    .unwrap_or_else(|| String::from("None"))
            )
        };
        Box::new(logger)
    }
}

impl Logger for RecoverEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |recover_event: &RecoverEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECOVER,
                secs_since_unix_epoch(recover_event.timestamp),
                recover_event.node,
                recover_event.records_replayed,
                recover_event.pending_restored
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompactLogEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |compact_log_event: &CompactLogEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMPACT_LOG,
                secs_since_unix_epoch(compact_log_event.timestamp),
                compact_log_event.node,
                compact_log_event.records_before,
                compact_log_event.records_after
            )
        };
        Box::new(logger)
    }
}

fn operation_name(is_delete: bool) -> &'static str {
    if is_delete {
        "Del"
    } else {
        "Put"
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_abbreviated() {
        assert_eq!(first_seven_base64_chars(b"pkey0"), "cGtleTA");
        assert_eq!(first_seven_base64_chars(b"a"), "YQ");
        assert_eq!(first_seven_base64_chars(b"a much longer key"), "YSBtdWN");
    }
}
