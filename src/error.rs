/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single error type returned by every fallible operation in the crate.
//!
//! Each variant renders as a fixed, human-readable message. These messages travel over the wire inside
//! `Response` messages, and [KVError::from_message] turns them back into variants on the receiving side, so an
//! error raised on a storage node surfaces as the same variant at the master and at the client.

use std::io;

pub const SUCCESS: &str = "Success";

pub const ERROR_INVALID_FORMAT: &str = "Data Error: Message format incorrect";
pub const ERROR_INVALID_KEY: &str = "Data Error: Null or empty key";
pub const ERROR_OVERSIZED_KEY: &str = "Data Error: Oversized key";
pub const ERROR_INVALID_VALUE: &str = "Data Error: Null or empty value";
pub const ERROR_OVERSIZED_VALUE: &str = "Data Error: Oversized value";
pub const ERROR_NO_SUCH_KEY: &str = "Data Error: Key does not exist";

pub const ERROR_COULD_NOT_CONNECT: &str = "Network Error: Could not connect";
pub const ERROR_COULD_NOT_CREATE_SOCKET: &str = "Network Error: Could not create socket";
pub const ERROR_COULD_NOT_SEND_DATA: &str = "Network Error: Could not send data";
pub const ERROR_COULD_NOT_RECEIVE_DATA: &str = "Network Error: Could not receive data";
pub const ERROR_COULD_NOT_CLOSE: &str = "Network Error: Could not close socket";
pub const ERROR_SOCKET_TIMEOUT: &str = "Network Error: Socket timeout";

pub const ERROR_PARSER: &str = "Unknown Error: Error parsing message";
pub const ERROR_COULD_NOT_COMPLETE_WRITE: &str = "Unknown Error: Could not complete write";

const PROTOCOL_ERROR_PREFIX: &str = "Protocol Error: ";
const IO_ERROR_PREFIX: &str = "IO Error: ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KVError {
    #[error("{}", ERROR_INVALID_FORMAT)]
    InvalidFormat,
    #[error("{}", ERROR_INVALID_KEY)]
    InvalidKey,
    #[error("{}", ERROR_OVERSIZED_KEY)]
    OversizedKey,
    #[error("{}", ERROR_INVALID_VALUE)]
    InvalidValue,
    #[error("{}", ERROR_OVERSIZED_VALUE)]
    OversizedValue,
    #[error("{}", ERROR_NO_SUCH_KEY)]
    NoSuchKey,
    #[error("{}", ERROR_COULD_NOT_CONNECT)]
    CouldNotConnect,
    #[error("{}", ERROR_COULD_NOT_CREATE_SOCKET)]
    CouldNotCreateSocket,
    #[error("{}", ERROR_COULD_NOT_SEND_DATA)]
    CouldNotSendData,
    #[error("{}", ERROR_COULD_NOT_RECEIVE_DATA)]
    CouldNotReceiveData,
    #[error("{}", ERROR_COULD_NOT_CLOSE)]
    CouldNotClose,
    #[error("{}", ERROR_SOCKET_TIMEOUT)]
    SocketTimeout,
    #[error("{}", ERROR_PARSER)]
    Parser,
    #[error("{}", ERROR_COULD_NOT_COMPLETE_WRITE)]
    CouldNotCompleteWrite,
    /// A participant received a decision or proposal that its transaction state does not allow.
    #[error("Protocol Error: {0}")]
    ProtocolViolation(String),
    /// Local persistence (write-ahead log or durable store) failed.
    #[error("IO Error: {0}")]
    Io(String),
    /// An error reply whose text does not correspond to any known variant.
    #[error("{0}")]
    Remote(String),
}

impl KVError {
    /// Recover the variant that produced `message`. Unknown texts are kept verbatim in [KVError::Remote].
    pub fn from_message(message: &str) -> KVError {
        match message {
            ERROR_INVALID_FORMAT => KVError::InvalidFormat,
            ERROR_INVALID_KEY => KVError::InvalidKey,
            ERROR_OVERSIZED_KEY => KVError::OversizedKey,
            ERROR_INVALID_VALUE => KVError::InvalidValue,
            ERROR_OVERSIZED_VALUE => KVError::OversizedValue,
            ERROR_NO_SUCH_KEY => KVError::NoSuchKey,
            ERROR_COULD_NOT_CONNECT => KVError::CouldNotConnect,
            ERROR_COULD_NOT_CREATE_SOCKET => KVError::CouldNotCreateSocket,
            ERROR_COULD_NOT_SEND_DATA => KVError::CouldNotSendData,
            ERROR_COULD_NOT_RECEIVE_DATA => KVError::CouldNotReceiveData,
            ERROR_COULD_NOT_CLOSE => KVError::CouldNotClose,
            ERROR_SOCKET_TIMEOUT => KVError::SocketTimeout,
            ERROR_PARSER => KVError::Parser,
            ERROR_COULD_NOT_COMPLETE_WRITE => KVError::CouldNotCompleteWrite,
            other => {
                if let Some(detail) = other.strip_prefix(PROTOCOL_ERROR_PREFIX) {
                    KVError::ProtocolViolation(detail.to_string())
                } else if let Some(detail) = other.strip_prefix(IO_ERROR_PREFIX) {
                    KVError::Io(detail.to_string())
                } else {
                    KVError::Remote(other.to_string())
                }
            }
        }
    }

    /// Whether the error was produced by checking a key or value, as opposed to the state of a store or the
    /// network.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            KVError::InvalidKey | KVError::OversizedKey | KVError::InvalidValue | KVError::OversizedValue
        )
    }
}

impl From<io::Error> for KVError {
    fn from(err: io::Error) -> Self {
        KVError::Io(err.to_string())
    }
}
