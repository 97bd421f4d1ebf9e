//! An in-process [`Network`] that delivers requests straight to [`Participant`]s.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use tpc_kvstore::{
    error::KVError,
    messages::{KVMessage, MessageType},
    networking::Network,
    participant::Participant,
    registration::NodeInfo,
    store::MemStore,
    types::NodeID,
};

/// A mock network stub which hands every request to the addressed participant on the calling thread.
///
/// Requests and replies still go through the wire encoding. Nodes can be made unreachable, replies of a given
/// type can be dropped after the participant has processed the request, and every round trip can be delayed.
#[derive(Clone, Default)]
pub(crate) struct NetworkStub(Arc<StubState>);

#[derive(Default)]
struct StubState {
    nodes: Mutex<HashMap<NodeID, Arc<Participant<MemStore>>>>,
    unreachable: Mutex<HashSet<NodeID>>,
    lost_replies: Mutex<HashMap<(NodeID, MessageType), usize>>,
    latency: Mutex<Duration>,
    requests: AtomicUsize,
}

impl NetworkStub {
    pub(crate) fn new() -> NetworkStub {
        NetworkStub::default()
    }

    pub(crate) fn connect(&self, participant: Arc<Participant<MemStore>>) {
        self.0
            .nodes
            .lock()
            .unwrap()
            .insert(participant.node_id(), participant);
    }

    pub(crate) fn participant(&self, node: NodeID) -> Option<Arc<Participant<MemStore>>> {
        self.0.nodes.lock().unwrap().get(&node).cloned()
    }

    pub(crate) fn set_reachable(&self, node: NodeID, reachable: bool) {
        let mut unreachable = self.0.unreachable.lock().unwrap();
        if reachable {
            unreachable.remove(&node);
        } else {
            unreachable.insert(node);
        }
    }

    /// Drop the replies to the next `count` requests of type `msg_type` sent to `node`.
    pub(crate) fn lose_replies(&self, node: NodeID, msg_type: MessageType, count: usize) {
        self.0.lost_replies.lock().unwrap().insert((node, msg_type), count);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.0.latency.lock().unwrap() = latency;
    }

    /// Number of requests sent so far, including those that failed.
    pub(crate) fn requests_sent(&self) -> usize {
        self.0.requests.load(Ordering::SeqCst)
    }

    fn take_lost_reply(&self, node: NodeID, msg_type: MessageType) -> bool {
        let mut lost_replies = self.0.lost_replies.lock().unwrap();
        match lost_replies.get_mut(&(node, msg_type)) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Network for NetworkStub {
    fn request(&self, node: &NodeInfo, request: &KVMessage, _: Duration) -> Result<KVMessage, KVError> {
        self.0.requests.fetch_add(1, Ordering::SeqCst);
        if self.0.unreachable.lock().unwrap().contains(&node.id()) {
            return Err(KVError::CouldNotConnect);
        }
        let participant = self
            .0
            .nodes
            .lock()
            .unwrap()
            .get(&node.id())
            .cloned()
            .ok_or(KVError::CouldNotConnect)?;

        let latency = *self.0.latency.lock().unwrap();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let request = KVMessage::decode(&request.encode()?)?;
        let response = participant.handle(&request);
        if self.take_lost_reply(node.id(), request.msg_type()) {
            return Err(KVError::SocketTimeout);
        }
        participant.response_sent(&response);

        KVMessage::decode(&response.encode()?)
    }
}
