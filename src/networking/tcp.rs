/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::KVError;
use crate::messages::KVMessage;
use crate::registration::NodeInfo;

use super::network::Network;
use super::stream::{self, recv_message, send_message};

/// [Network] implementation that opens a fresh TCP connection for every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpNetwork;

impl TcpNetwork {
    pub fn new() -> TcpNetwork {
        TcpNetwork
    }
}

impl Network for TcpNetwork {
    fn request(&self, node: &NodeInfo, request: &KVMessage, timeout: Duration) -> Result<KVMessage, KVError> {
        let deadline = Instant::now() + timeout;
        let mut tcp_stream = connect(node.hostname(), node.port(), timeout)?;
        tcp_stream
            .set_write_timeout(Some(timeout))
            .map_err(|_| KVError::CouldNotCreateSocket)?;

        send_message(&mut tcp_stream, request)?;
        let reply = recv_message(&mut tcp_stream, Some(deadline));

        // Best effort: the reply (or its failure) is all the caller cares about.
        let _ = stream::close(&tcp_stream);
        reply
    }
}

/// Open a connection to `hostname:port`, trying each resolved address in turn within `timeout`.
pub fn connect(hostname: &str, port: u16, timeout: Duration) -> Result<TcpStream, KVError> {
    let addrs = (hostname, port)
        .to_socket_addrs()
        .map_err(|_| KVError::CouldNotConnect)?;

    let mut last_err = KVError::CouldNotConnect;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp_stream) => return Ok(tcp_stream),
            Err(err) => {
                last_err = match err.kind() {
                    ErrorKind::TimedOut | ErrorKind::WouldBlock => KVError::SocketTimeout,
                    ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => KVError::CouldNotConnect,
                    _ => KVError::CouldNotCreateSocket,
                }
            }
        }
    }
    Err(last_err)
}
