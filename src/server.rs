/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! TCP listeners and the handlers that serve their connections.
//!
//! A [SocketServer] accepts connections on a background thread and passes each one to a [NetworkHandler]. The
//! handlers in this module do not serve a connection on the accepting thread: they queue it on their own
//! [ThreadPool], where exactly one request is read from it and exactly one reply is written back.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::coordinator::Coordinator;
use crate::error::KVError;
use crate::messages::KVMessage;
use crate::networking::stream::{self, recv_message, send_message};
use crate::networking::Network;
use crate::participant::Participant;
use crate::registration::handle_registration;
use crate::store::Store;
use crate::thread_pool::ThreadPool;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const PARTICIPANT_QUEUE_CAPACITY: usize = 16;

pub trait NetworkHandler: Send + Sync + 'static {
    /// Take charge of a freshly accepted connection. Must not block on the connection itself.
    fn handle(&self, stream: TcpStream);
}

pub struct SocketServer {
    hostname: String,
    port: u16,
    listener: TcpListener,
}

impl SocketServer {
    /// Bind a listener on `hostname:port`. Port 0 picks a free port; [SocketServer::port] tells which.
    pub fn bind(hostname: &str, port: u16) -> Result<SocketServer, KVError> {
        let listener = TcpListener::bind((hostname, port)).map_err(|err| {
            log::error!("Could not bind to {}:{}: {}", hostname, port, err);
            KVError::CouldNotCreateSocket
        })?;
        let port = listener
            .local_addr()
            .map_err(|_| KVError::CouldNotCreateSocket)?
            .port();
        listener
            .set_nonblocking(true)
            .map_err(|_| KVError::CouldNotCreateSocket)?;

        Ok(SocketServer {
            hostname: hostname.to_string(),
            port,
            listener,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start accepting connections on a background thread, passing each to `handler`.
    pub fn start<H: NetworkHandler>(self, handler: H) -> ServerHandle {
        let (shutdown, shutdown_signal) = mpsc::channel();
        let hostname = self.hostname.clone();
        let port = self.port;

        let accept_loop = thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match self.listener.accept() {
                Ok((tcp_stream, _)) => {
                    // Accepted sockets inherit the listener's non-blocking mode on some platforms.
                    if let Err(err) = tcp_stream.set_nonblocking(false) {
                        log::warn!("Dropping connection that cannot be made blocking: {}", err);
                        continue;
                    }
                    handler.handle(tcp_stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(err) => log::warn!("Failed to accept a connection on port {}: {}", self.port, err),
            }
        });

        ServerHandle {
            hostname,
            port,
            accept_loop: Some(accept_loop),
            shutdown,
        }
    }
}

/// A handle to the accept loop of a [SocketServer]. When this value is dropped, the loop stops and the
/// handler, with its workers, is shut down.
pub struct ServerHandle {
    hostname: String,
    port: u16,
    accept_loop: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
}

impl ServerHandle {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(accept_loop) = self.accept_loop.take() {
            let _ = accept_loop.join();
        }
    }
}

/// Serves client requests on the master.
pub struct ClientHandler<N: Network> {
    coordinator: Arc<Coordinator<N>>,
    thread_pool: ThreadPool,
    read_timeout: Duration,
}

impl<N: Network> ClientHandler<N> {
    pub fn new(coordinator: Arc<Coordinator<N>>, worker_threads: usize, read_timeout: Duration) -> Self {
        ClientHandler {
            coordinator,
            thread_pool: ThreadPool::new(worker_threads, worker_threads),
            read_timeout,
        }
    }
}

impl<N: Network> NetworkHandler for ClientHandler<N> {
    fn handle(&self, stream: TcpStream) {
        let coordinator = Arc::clone(&self.coordinator);
        let read_timeout = self.read_timeout;
        self.thread_pool.execute(move || {
            serve_connection(stream, read_timeout, |request| coordinator.handle_client_request(request));
        });
    }
}

/// Serves registrations of storage nodes on the master.
pub struct RegistrationHandler<N: Network> {
    coordinator: Arc<Coordinator<N>>,
    thread_pool: ThreadPool,
    read_timeout: Duration,
    log_events: bool,
}

impl<N: Network> RegistrationHandler<N> {
    pub fn new(coordinator: Arc<Coordinator<N>>, read_timeout: Duration, log_events: bool) -> Self {
        RegistrationHandler {
            coordinator,
            thread_pool: ThreadPool::new(1, 16),
            read_timeout,
            log_events,
        }
    }
}

impl<N: Network> NetworkHandler for RegistrationHandler<N> {
    fn handle(&self, stream: TcpStream) {
        let coordinator = Arc::clone(&self.coordinator);
        let read_timeout = self.read_timeout;
        let log_events = self.log_events;
        self.thread_pool.execute(move || {
            serve_connection(stream, read_timeout, |request| {
                handle_registration(coordinator.ring(), &request, log_events)
            });
        });
    }
}

/// Serves the master's requests on a storage node.
///
/// Requests are served one at a time, in the order their connections were accepted. A proposal whose reply
/// timed out at the master is then always handled before the ABORT that follows it, so it never becomes
/// pending after its own decision.
pub struct ParticipantHandler<S: Store> {
    participant: Arc<Participant<S>>,
    thread_pool: ThreadPool,
    read_timeout: Duration,
}

impl<S: Store> ParticipantHandler<S> {
    pub fn new(participant: Arc<Participant<S>>, read_timeout: Duration) -> Self {
        ParticipantHandler {
            participant,
            thread_pool: ThreadPool::new(1, PARTICIPANT_QUEUE_CAPACITY),
            read_timeout,
        }
    }
}

impl<S: Store> NetworkHandler for ParticipantHandler<S> {
    fn handle(&self, stream: TcpStream) {
        let participant = Arc::clone(&self.participant);
        let read_timeout = self.read_timeout;
        self.thread_pool.execute(move || {
            let sent = serve_connection(stream, read_timeout, |request| participant.handle(&request));
            if let Some(response) = sent {
                participant.response_sent(&response);
            }
        });
    }
}

// Read one request, answer it with `respond`, and close the connection. Returns the reply if it was delivered.
fn serve_connection(
    mut tcp_stream: TcpStream,
    read_timeout: Duration,
    respond: impl FnOnce(KVMessage) -> KVMessage,
) -> Option<KVMessage> {
    let response = match recv_message(&mut tcp_stream, Some(Instant::now() + read_timeout)) {
        Ok(request) => respond(request),
        Err(err) => KVMessage::error_response(&err),
    };

    let delivered = match send_message(&mut tcp_stream, &response) {
        Ok(()) => Some(response),
        Err(err) => {
            log::debug!("Could not deliver a response: {}", err);
            None
        }
    };
    let _ = stream::close(&tcp_stream);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_server::KVServer;
    use crate::messages::MessageType;
    use crate::networking::tcp::connect;
    use crate::store::MemStore;
    use crate::types::NodeID;
    use crate::wal::WriteAheadLog;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn participant_requests_are_served_in_accept_order() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("node.log")).unwrap();
        let kv_server = KVServer::new(MemStore::new(), 4, 4);
        let participant = Arc::new(Participant::recover(NodeID::new(1), kv_server, wal, 100, false).unwrap());
        let server = SocketServer::bind("127.0.0.1", 0)
            .unwrap()
            .start(ParticipantHandler::new(Arc::clone(&participant), TIMEOUT));

        // The proposal's connection is accepted first, but its request arrives after the ABORT's.
        let mut proposal = connect("127.0.0.1", server.port(), TIMEOUT).unwrap();
        thread::sleep(Duration::from_millis(100));
        let mut abort = connect("127.0.0.1", server.port(), TIMEOUT).unwrap();
        send_message(&mut abort, &KVMessage::abort(None)).unwrap();
        thread::sleep(Duration::from_millis(100));
        send_message(&mut proposal, &KVMessage::put_request(b"k".to_vec(), b"v".to_vec())).unwrap();

        let vote = recv_message(&mut proposal, Some(Instant::now() + TIMEOUT)).unwrap();
        assert_eq!(vote.msg_type(), MessageType::Ready);
        let ack = recv_message(&mut abort, Some(Instant::now() + TIMEOUT)).unwrap();
        assert_eq!(ack.msg_type(), MessageType::Ack);

        assert_eq!(participant.pending(), None);
        assert!(!participant.kv_server().has_key(b"k"));
    }
}
