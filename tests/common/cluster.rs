//! A master's [`Coordinator`] wired to storage-node [`Participant`]s through a [`NetworkStub`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use tempfile::TempDir;
use tpc_kvstore::{
    config::MasterConfiguration,
    coordinator::Coordinator,
    kv_server::KVServer,
    participant::Participant,
    registration::NodeInfo,
    store::MemStore,
    types::NodeID,
    wal::WriteAheadLog,
};

use super::network::NetworkStub;

pub(crate) struct Cluster {
    pub(crate) coordinator: Arc<Coordinator<NetworkStub>>,
    pub(crate) network: NetworkStub,
    node_ids: Vec<NodeID>,
    log_dir: TempDir,
}

impl Cluster {
    /// Start `num_nodes` storage nodes with identifiers spread evenly over the ring, and register them all.
    pub(crate) fn new(num_nodes: u64) -> Cluster {
        let network = NetworkStub::new();
        let configuration = MasterConfiguration::builder()
            .num_nodes(num_nodes as usize)
            .cache_num_sets(4)
            .cache_set_capacity(4)
            .request_timeout(Duration::from_millis(500))
            .retry_interval(Duration::from_millis(10))
            .log_events(true)
            .build();
        let coordinator = Arc::new(Coordinator::new(network.clone(), &configuration));

        let spacing = u64::MAX / num_nodes;
        let node_ids = (0..num_nodes).map(|i| NodeID::new(i * spacing + spacing / 2)).collect();
        let cluster = Cluster {
            coordinator,
            network,
            node_ids,
            log_dir: tempfile::tempdir().unwrap(),
        };

        for node_id in cluster.node_ids.clone() {
            cluster.start_node(node_id);
            cluster
                .coordinator
                .register(NodeInfo::new(node_id, String::from("stub"), 0))
                .unwrap();
        }
        cluster
    }

    pub(crate) fn node_ids(&self) -> &[NodeID] {
        &self.node_ids
    }

    /// Identifiers of the (primary, secondary) replicas of `key`.
    pub(crate) fn replicas_for(&self, key: &[u8]) -> (NodeID, NodeID) {
        let (primary, secondary) = self.coordinator.ring().replicas_for(key);
        (primary.id(), secondary.id())
    }

    /// Bring up the node from its log, with empty memory, and route its requests to the new instance.
    pub(crate) fn restart(&self, node_id: NodeID) -> Arc<Participant<MemStore>> {
        self.start_node(node_id)
    }

    pub(crate) fn participant(&self, node_id: NodeID) -> Arc<Participant<MemStore>> {
        self.network.participant(node_id).unwrap()
    }

    fn log_path(&self, node_id: NodeID) -> PathBuf {
        self.log_dir.path().join(format!("node-{}.log", node_id))
    }

    fn start_node(&self, node_id: NodeID) -> Arc<Participant<MemStore>> {
        let wal = WriteAheadLog::open(self.log_path(node_id)).unwrap();
        let kv_server = KVServer::new(MemStore::new(), 4, 4);
        let participant = Arc::new(Participant::recover(node_id, kv_server, wal, 1024, true).unwrap());
        self.network.connect(Arc::clone(&participant));
        participant
    }
}
