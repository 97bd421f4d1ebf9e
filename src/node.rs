/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to start and run a storage node.
//!
//! Starting a storage node:
//! 1. Opens its write-ahead log and rebuilds its local data from it (see [Participant::recover]).
//! 2. Starts listening for requests from the master.
//! 3. Registers with the master, announcing where it listens.
//!
//! A node that restarts with the same identifier and log takes its old place on the replica ring, with
//! everything it had committed and the operation it had voted on, if any.

use std::sync::Arc;

use crate::config::NodeConfiguration;
use crate::error::KVError;
use crate::kv_server::KVServer;
use crate::participant::Participant;
use crate::registration::{register_with_master, NodeInfo};
use crate::server::{ParticipantHandler, ServerHandle, SocketServer};
use crate::store::{FileStore, MemStore, Store};
use crate::wal::WriteAheadLog;

/// A handle to a running storage node. When this value is dropped, the node stops listening.
pub struct StorageNode {
    info: NodeInfo,
    participant: Arc<Participant<Box<dyn Store>>>,
    server: ServerHandle,
}

impl StorageNode {
    pub fn start(configuration: NodeConfiguration) -> Result<StorageNode, KVError> {
        let store: Box<dyn Store> = match &configuration.store_path {
            Some(store_path) => Box::new(FileStore::open(store_path)?),
            None => Box::new(MemStore::new()),
        };
        let kv_server = KVServer::new(store, configuration.cache_num_sets, configuration.cache_set_capacity);
        let wal = WriteAheadLog::open(&configuration.log_path)?;
        let participant = Arc::new(Participant::recover(
            configuration.node_id,
            kv_server,
            wal,
            configuration.compaction_threshold,
            configuration.log_events,
        )?);

        let listener = SocketServer::bind(&configuration.hostname, configuration.port)?;
        let info = NodeInfo::new(configuration.node_id, listener.hostname().to_string(), listener.port());
        let server = listener.start(ParticipantHandler::new(Arc::clone(&participant), configuration.request_timeout));

        register_with_master(
            &configuration.master_hostname,
            configuration.master_registration_port,
            &info,
            configuration.request_timeout,
        )?;
        log::info!("Storage node {} registered with the master", info);

        Ok(StorageNode {
            info,
            participant,
            server,
        })
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn participant(&self) -> &Participant<Box<dyn Store>> {
        &self.participant
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }
}
