/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::time::Duration;

use crate::error::KVError;
use crate::messages::KVMessage;
use crate::registration::NodeInfo;

pub trait Network: Send + Sync + 'static {
    /// Deliver `request` to `node` and wait for its single reply.
    ///
    /// The whole round trip (connect, send, receive) must complete within `timeout`. Transport problems are
    /// reported as the matching network [KVError]; they must never panic, since the coordinator treats them as
    /// ordinary negative outcomes.
    fn request(&self, node: &NodeInfo, request: &KVMessage, timeout: Duration) -> Result<KVMessage, KVError>;
}
