/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable master-to-node networking.
//!
//! The [coordinator](crate::coordinator) reaches storage nodes only through the [Network] trait, so tests can
//! swap the [TCP implementation](tcp::TcpNetwork) for an in-process stub. The [stream] module holds the wire
//! framing used by the TCP implementation and by the [server](crate::server) handlers.

pub mod network;

pub mod stream;

pub mod tcp;

pub use network::Network;
pub use tcp::TcpNetwork;
