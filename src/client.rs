/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A client of the master's client port.

use std::time::{Duration, Instant};

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::KVError;
use crate::messages::{KVMessage, MessageType};
use crate::networking::stream::{self, recv_message, send_message};
use crate::networking::tcp::connect;
use crate::types::{check_key, check_value, Key, Value};

pub struct KVClient {
    hostname: String,
    port: u16,
    timeout: Duration,
}

impl KVClient {
    pub fn new(hostname: impl Into<String>, port: u16) -> KVClient {
        KVClient {
            hostname: hostname.into(),
            port,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every request (connecting, sending, and waiting for the reply) by `timeout`.
    ///
    /// A write keeps the master busy until both replicas have acknowledged its outcome, so the timeout should be
    /// generous.
    pub fn with_timeout(mut self, timeout: Duration) -> KVClient {
        self.timeout = timeout;
        self
    }

    pub fn put(&self, key: Key, value: Value) -> Result<(), KVError> {
        check_key(&key)?;
        check_value(&value)?;
        let reply = self.request(KVMessage::put_request(key, value))?;
        Self::expect_success(reply)
    }

    pub fn get(&self, key: Key) -> Result<Value, KVError> {
        check_key(&key)?;
        let reply = self.request(KVMessage::get_request(key))?;
        if let Some(err) = reply.response_error() {
            return Err(err);
        }
        let (_, value) = reply.into_key_value();
        value.ok_or(KVError::InvalidFormat)
    }

    pub fn del(&self, key: Key) -> Result<(), KVError> {
        check_key(&key)?;
        let reply = self.request(KVMessage::del_request(key))?;
        Self::expect_success(reply)
    }

    fn request(&self, request: KVMessage) -> Result<KVMessage, KVError> {
        let deadline = Instant::now() + self.timeout;
        let mut tcp_stream = connect(&self.hostname, self.port, self.timeout)?;
        send_message(&mut tcp_stream, &request)?;
        let reply = recv_message(&mut tcp_stream, Some(deadline));
        let _ = stream::close(&tcp_stream);

        let reply = reply?;
        if reply.msg_type() != MessageType::Response {
            return Err(KVError::InvalidFormat);
        }
        Ok(reply)
    }

    fn expect_success(reply: KVMessage) -> Result<(), KVError> {
        match (reply.response_error(), reply.message()) {
            (Some(err), _) => Err(err),
            (None, Some(_)) => Ok(()),
            (None, None) => Err(KVError::InvalidFormat),
        }
    }
}
