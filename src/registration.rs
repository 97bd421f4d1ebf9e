/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The handshake by which storage nodes join the [replica ring](crate::ring::ReplicaRing).
//!
//! A node identifies itself with a registration string of the form `"<id>@<hostname>:<port>"`, where `<id>` is
//! an unsigned 64-bit integer and `<hostname>:<port>` is where the node listens for requests from the master.
//! The master answers with `"Successfully registered <registration string>"`.

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant, SystemTime};

use crate::error::KVError;
use crate::events::RegisterNodeEvent;
use crate::logging::Logger;
use crate::messages::{KVMessage, MessageType};
use crate::networking::stream::{self, recv_message, send_message};
use crate::networking::tcp::connect;
use crate::ring::ReplicaRing;
use crate::types::NodeID;

const REGISTRATION_REPLY_PREFIX: &str = "Successfully registered ";

/// Identity and endpoint of a storage node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    id: NodeID,
    hostname: String,
    port: u16,
}

impl NodeInfo {
    pub fn new(id: NodeID, hostname: String, port: u16) -> NodeInfo {
        NodeInfo { id, hostname, port }
    }

    /// Parse a registration string, `"<id>@<hostname>:<port>"`.
    pub fn parse(info: &str) -> Result<NodeInfo, KVError> {
        let (rest, port) = info.rsplit_once(':').ok_or(KVError::InvalidFormat)?;
        let (id, hostname) = rest.rsplit_once('@').ok_or(KVError::InvalidFormat)?;
        if hostname.is_empty() {
            return Err(KVError::InvalidFormat);
        }
        let id = id.parse::<u64>().map_err(|_| KVError::InvalidFormat)?;
        let port = port.parse::<u16>().map_err(|_| KVError::InvalidFormat)?;

        Ok(NodeInfo::new(NodeID::new(id), hostname.to_string(), port))
    }

    pub fn id(&self) -> NodeID {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn update_endpoint(&mut self, hostname: String, port: u16) {
        self.hostname = hostname;
        self.port = port;
    }
}

impl Display for NodeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.hostname, self.port)
    }
}

/// Serve one registration request on the master. Always produces a reply for the registering node.
pub fn handle_registration(ring: &ReplicaRing, request: &KVMessage, log_events: bool) -> KVMessage {
    if request.msg_type() != MessageType::Register {
        return KVMessage::error_response(&KVError::InvalidFormat);
    }
    let Some(info) = request.message() else {
        return KVMessage::error_response(&KVError::InvalidFormat);
    };

    let node = match NodeInfo::parse(info) {
        Ok(node) => node,
        Err(err) => {
            log::warn!("Rejected malformed registration string {:?}", info);
            return KVMessage::error_response(&err);
        }
    };

    match ring.register(node.clone()) {
        Ok(registration) => {
            if log_events {
                RegisterNodeEvent::get_logger()(&RegisterNodeEvent {
                    timestamp: SystemTime::now(),
                    node,
                    registration,
                    registered: ring.len(),
                    expected: ring.num_nodes(),
                });
            }
            KVMessage::message_response(format!("{}{}", REGISTRATION_REPLY_PREFIX, info))
        }
        Err(err) => {
            log::warn!("Rejected registration of {}: {}", node, err);
            KVMessage::error_response(&err)
        }
    }
}

/// Register `node` with the master listening for registrations at `master_hostname:master_port`.
pub fn register_with_master(
    master_hostname: &str,
    master_port: u16,
    node: &NodeInfo,
    timeout: Duration,
) -> Result<(), KVError> {
    let deadline = Instant::now() + timeout;
    let mut tcp_stream = connect(master_hostname, master_port, timeout)?;
    send_message(&mut tcp_stream, &KVMessage::register(node.to_string()))?;
    let reply = recv_message(&mut tcp_stream, Some(deadline));
    let _ = stream::close(&tcp_stream);
    let reply = reply?;

    match reply.message() {
        Some(text) if reply.msg_type() == MessageType::Response && text.starts_with(REGISTRATION_REPLY_PREFIX) => {
            Ok(())
        }
        _ => Err(reply.response_error().unwrap_or(KVError::InvalidFormat)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_registration_strings() {
        let node = NodeInfo::parse("18446744073709551615@storage-1.local:8081").unwrap();
        assert_eq!(node.id(), NodeID::new(u64::MAX));
        assert_eq!(node.hostname(), "storage-1.local");
        assert_eq!(node.port(), 8081);
        assert_eq!(node.to_string(), "18446744073709551615@storage-1.local:8081");
    }

    #[test]
    fn rejects_malformed_registration_strings() {
        for info in ["", "12@host", "host:80", "-1@host:80", "x@host:80", "1@:80", "1@host:port", "1@host:70000"] {
            assert_eq!(NodeInfo::parse(info), Err(KVError::InvalidFormat), "{}", info);
        }
    }

    #[test]
    fn registration_replies_and_updates_ring() {
        let ring = ReplicaRing::new(2);
        let reply = handle_registration(&ring, &KVMessage::register("3@localhost:9000"), false);
        assert_eq!(reply.message(), Some("Successfully registered 3@localhost:9000"));
        assert_eq!(ring.len(), 1);

        let reply = handle_registration(&ring, &KVMessage::register("garbage"), false);
        assert_eq!(reply.response_error(), Some(KVError::InvalidFormat));

        let reply = handle_registration(&ring, &KVMessage::ready(), false);
        assert_eq!(reply.response_error(), Some(KVError::InvalidFormat));
        assert_eq!(ring.len(), 1);
    }
}
