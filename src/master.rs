/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to start and run the master.
//!
//! The master listens on two ports: one for client requests and one for registrations of storage nodes. Client
//! requests block until [num_nodes](crate::config::MasterConfiguration::num_nodes) storage nodes have
//! registered.
//!
//! ## Starting the master
//!
//! ```ignore
//! let master = Master::start(
//!     MasterConfiguration::builder()
//!     .num_nodes(4)
//!     .build()
//! )?;
//! ```

use std::sync::Arc;

use crate::config::MasterConfiguration;
use crate::coordinator::Coordinator;
use crate::error::KVError;
use crate::networking::{Network, TcpNetwork};
use crate::server::{ClientHandler, RegistrationHandler, ServerHandle, SocketServer};

/// A handle to the background threads of a running master. When this value is dropped, both listeners are shut
/// down.
pub struct Master<N: Network = TcpNetwork> {
    coordinator: Arc<Coordinator<N>>,
    client_server: ServerHandle,
    registration_server: ServerHandle,
}

impl Master<TcpNetwork> {
    /// Bind both listeners and start serving, talking to storage nodes over TCP.
    pub fn start(configuration: MasterConfiguration) -> Result<Master<TcpNetwork>, KVError> {
        Master::start_with_network(TcpNetwork::new(), configuration)
    }
}

impl<N: Network> Master<N> {
    /// Like [Master::start], but talking to storage nodes through `network`.
    pub fn start_with_network(network: N, configuration: MasterConfiguration) -> Result<Master<N>, KVError> {
        let coordinator = Arc::new(Coordinator::new(network, &configuration));

        let registration_listener = SocketServer::bind(&configuration.hostname, configuration.registration_port)?;
        let client_listener = SocketServer::bind(&configuration.hostname, configuration.client_port)?;

        let registration_server = registration_listener.start(RegistrationHandler::new(
            Arc::clone(&coordinator),
            configuration.request_timeout,
            configuration.log_events,
        ));
        let client_server = client_listener.start(ClientHandler::new(
            Arc::clone(&coordinator),
            configuration.worker_threads,
            configuration.request_timeout,
        ));

        log::info!(
            "Master listening for clients on {}:{} and for storage nodes on {}:{}",
            client_server.hostname(),
            client_server.port(),
            registration_server.hostname(),
            registration_server.port()
        );

        Ok(Master {
            coordinator,
            client_server,
            registration_server,
        })
    }

    pub fn coordinator(&self) -> &Coordinator<N> {
        &self.coordinator
    }

    pub fn client_port(&self) -> u16 {
        self.client_server.port()
    }

    pub fn registration_port(&self) -> u16 {
        self.registration_server.port()
    }
}
