/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Framing of a single [KVMessage] over a TCP connection.
//!
//! There is no length prefix: the sender writes the encoded message and then half-closes its sending side, and
//! the receiver reads until end-of-stream. The connection stays open in the other direction, so the receiver
//! can still reply on it.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

use crate::error::KVError;
use crate::messages::{KVMessage, MAX_MESSAGE_SIZE};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Write `msg` and half-close the sending side of `stream`.
pub fn send_message(stream: &mut TcpStream, msg: &KVMessage) -> Result<(), KVError> {
    let bytes = msg.encode()?;
    stream.write_all(&bytes).map_err(|_| KVError::CouldNotSendData)?;
    stream.flush().map_err(|_| KVError::CouldNotSendData)?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(|_| KVError::CouldNotSendData)
}

/// Read one message from `stream`, i.e., everything until the peer half-closes.
///
/// If `deadline` is given, the whole read must finish before it, otherwise [KVError::SocketTimeout] is
/// returned. Without a deadline, the read blocks until the peer closes its side.
pub fn recv_message(stream: &mut TcpStream, deadline: Option<Instant>) -> Result<KVMessage, KVError> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(KVError::SocketTimeout);
            }
            stream
                .set_read_timeout(Some(deadline - now))
                .map_err(|_| KVError::CouldNotReceiveData)?;
        }

        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                bytes.extend_from_slice(&chunk[..n]);
                if bytes.len() > MAX_MESSAGE_SIZE {
                    return Err(KVError::InvalidFormat);
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock | ErrorKind::TimedOut => return Err(KVError::SocketTimeout),
                _ => return Err(KVError::CouldNotReceiveData),
            },
        }
    }

    KVMessage::decode(&bytes)
}

/// Fully close `stream`. A peer that already went away is not an error.
pub fn close(stream: &TcpStream) -> Result<(), KVError> {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
        Err(_) => Err(KVError::CouldNotClose),
    }
}
