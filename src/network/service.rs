//! Network event loop
//!
//! `NetworkService` is the only owner of the peer registry. Everything else
//! talks to it through a `NetworkHandle`: connection requests, broadcasts
//! and peer listings all arrive as channel messages.

use crate::config::NodeConfig;
use crate::network::message::Message;
use crate::network::peer::{normalize_addr, PeerError, PeerRegistry, PeerSummary};
use crate::network::server::{connect_to_peer, spawn_peer_io, FrameMode, PeerClosed, Server};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Delay after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// An established TCP connection waiting to be registered
struct NewConnection {
    stream: TcpStream,
    remote: SocketAddr,
    /// Normalized address the dial targeted; inbound connections have none
    dialed: Option<String>,
}

/// Cloneable front end of the network event loop
#[derive(Clone)]
pub struct NetworkHandle {
    connect_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<Message>,
    peers_tx: mpsc::Sender<oneshot::Sender<Vec<PeerSummary>>>,
}

impl NetworkHandle {
    /// Ask the network to dial `addr` (`ip` or `ip:port`)
    pub async fn connect(&self, addr: impl Into<String>) -> Result<(), PeerError> {
        self.connect_tx
            .send(addr.into())
            .await
            .map_err(|_| PeerError::ServiceStopped)
    }

    /// Queue a message for every peer except its origin
    pub async fn broadcast(&self, message: Message) -> Result<(), PeerError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| PeerError::ServiceStopped)
    }

    /// Sender side of the broadcast queue, for the consensus loop
    pub fn broadcast_sender(&self) -> mpsc::Sender<Message> {
        self.broadcast_tx.clone()
    }

    /// Currently registered peers
    pub async fn peers(&self) -> Result<Vec<PeerSummary>, PeerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.peers_tx
            .send(reply_tx)
            .await
            .map_err(|_| PeerError::ServiceStopped)?;
        reply_rx.await.map_err(|_| PeerError::ServiceStopped)
    }
}

/// The network event loop
pub struct NetworkService {
    server: Server,
    registry: PeerRegistry,
    framing: FrameMode,
    dial_timeout: Duration,
    dial_retry: bool,
    next_conn_id: u64,
    /// Decoded messages from every peer
    inbound_tx: mpsc::Sender<Message>,
    conn_tx: mpsc::Sender<NewConnection>,
    conn_rx: mpsc::Receiver<NewConnection>,
    closed_tx: mpsc::Sender<PeerClosed>,
    closed_rx: mpsc::Receiver<PeerClosed>,
    connect_rx: mpsc::Receiver<String>,
    broadcast_rx: mpsc::Receiver<Message>,
    peers_rx: mpsc::Receiver<oneshot::Sender<Vec<PeerSummary>>>,
}

impl NetworkService {
    /// Build the service around a bound listener.
    ///
    /// `self_addr` is this node's normalized address; connections to it are
    /// refused and broadcasts carry it as their origin.
    pub fn new(
        config: &NodeConfig,
        server: Server,
        self_addr: String,
        inbound_tx: mpsc::Sender<Message>,
    ) -> (Self, NetworkHandle) {
        let capacity = config.channel_capacity();
        let (conn_tx, conn_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = mpsc::channel(capacity);
        let (connect_tx, connect_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (peers_tx, peers_rx) = mpsc::channel(capacity);

        let service = Self {
            server,
            registry: PeerRegistry::new(self_addr, config.peer_port),
            framing: config.framing,
            dial_timeout: config.dial_timeout(),
            dial_retry: config.dial_retry,
            next_conn_id: 0,
            inbound_tx,
            conn_tx,
            conn_rx,
            closed_tx,
            closed_rx,
            connect_rx,
            broadcast_rx,
            peers_rx,
        };
        let handle = NetworkHandle {
            connect_tx,
            broadcast_tx,
            peers_tx,
        };
        (service, handle)
    }

    /// Run the event loop until every handle is gone
    pub async fn run(self) {
        let Self {
            server,
            mut registry,
            framing,
            dial_timeout,
            dial_retry,
            mut next_conn_id,
            inbound_tx,
            conn_tx,
            mut conn_rx,
            closed_tx,
            mut closed_rx,
            mut connect_rx,
            mut broadcast_rx,
            mut peers_rx,
        } = self;

        spawn_listener(server, conn_tx.clone());

        loop {
            tokio::select! {
                Some(conn) = conn_rx.recv() => {
                    let addr = conn
                        .dialed
                        .clone()
                        .unwrap_or_else(|| registry.inbound_addr(&conn.remote));
                    if let Err(e) = registry.check_new(&addr) {
                        info!("Dropping connection from {}: {}", conn.remote, e);
                        continue;
                    }

                    next_conn_id += 1;
                    let outbound = conn.dialed.is_some();
                    let handle = spawn_peer_io(
                        conn.stream,
                        addr,
                        next_conn_id,
                        framing,
                        inbound_tx.clone(),
                        closed_tx.clone(),
                    );
                    if let Err(e) = registry.insert(handle, conn.remote, outbound) {
                        warn!("Failed to register peer {}: {}", conn.remote, e);
                    }
                }
                Some(closed) = closed_rx.recv() => {
                    if !registry.remove(&closed.addr, closed.conn_id) {
                        debug!("Ignoring close of stale connection to {}", closed.addr);
                    }
                }
                Some(message) = broadcast_rx.recv() => {
                    registry.broadcast(&message);
                }
                Some(addr) = connect_rx.recv() => {
                    let addr = match normalize_addr(&addr, registry.peer_port()) {
                        Ok(addr) => addr,
                        Err(e) => {
                            warn!("Connection request ignored: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = registry.check_new(&addr) {
                        debug!("Not dialing {}: {}", addr, e);
                        continue;
                    }

                    info!("Connect to node: {}", addr);
                    spawn_dial(addr, dial_timeout, dial_retry, conn_tx.clone());
                }
                Some(reply) = peers_rx.recv() => {
                    let _ = reply.send(registry.summaries());
                }
                else => break,
            }
        }
    }
}

/// Accept inbound connections and hand them to the event loop
fn spawn_listener(server: Server, conn_tx: mpsc::Sender<NewConnection>) {
    tokio::spawn(async move {
        loop {
            match server.accept().await {
                Ok((stream, remote)) => {
                    debug!("Inbound connection from {}", remote);
                    let conn = NewConnection {
                        stream,
                        remote,
                        dialed: None,
                    };
                    if conn_tx.send(conn).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    });
}

/// Dial `addr` in the background and hand the connection to the event loop
fn spawn_dial(
    addr: String,
    timeout: Duration,
    retry: bool,
    conn_tx: mpsc::Sender<NewConnection>,
) {
    tokio::spawn(async move {
        let stream = match connect_to_peer(&addr, timeout, retry).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}: {}", addr, e);
                return;
            }
        };

        let remote = match stream.peer_addr() {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Connection to {} lost: {}", addr, e);
                return;
            }
        };

        let _ = conn_tx
            .send(NewConnection {
                stream,
                remote,
                dialed: Some(addr),
            })
            .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerTag;
    use crate::network::message::MessageKind;
    use bytes::Bytes;
    use tokio::time::{sleep, timeout};

    async fn start_service() -> (NetworkHandle, String, mpsc::Receiver<Message>) {
        let config = NodeConfig {
            queue_capacity: 8,
            ..Default::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let self_addr = server.local_addr().unwrap().to_string();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let (service, handle) = NetworkService::new(&config, server, self_addr.clone(), inbound_tx);
        tokio::spawn(service.run());
        (handle, self_addr, inbound_rx)
    }

    async fn wait_for_peers(handle: &NetworkHandle, count: usize) -> Vec<PeerSummary> {
        for _ in 0..100 {
            let peers = handle.peers().await.unwrap();
            if peers.len() == count {
                return peers;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("Peer count never reached {}", count);
    }

    #[tokio::test]
    async fn test_connect_and_broadcast() {
        let (a, a_addr, _a_inbound) = start_service().await;
        let (b, b_addr, mut b_inbound) = start_service().await;

        a.connect(b_addr.clone()).await.unwrap();
        let a_peers = wait_for_peers(&a, 1).await;
        assert_eq!(a_peers[0].addr, b_addr);
        assert!(a_peers[0].outbound);
        wait_for_peers(&b, 1).await;

        a.broadcast(Message::new(MessageKind::SendTransaction, Bytes::from_static(b"tx")))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(5), b_inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, MessageKind::SendTransaction);
        assert_eq!(received.origin, PeerTag::from_addr(&a_addr));
        assert_eq!(&received.data[..], b"tx");
    }

    #[tokio::test]
    async fn test_self_and_duplicate_requests_ignored() {
        let (a, a_addr, _a_inbound) = start_service().await;
        let (_b, b_addr, _b_inbound) = start_service().await;

        a.connect(a_addr).await.unwrap();
        a.connect(b_addr.clone()).await.unwrap();
        wait_for_peers(&a, 1).await;

        a.connect(b_addr).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(a.peers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_removed() {
        let (a, _a_addr, _a_inbound) = start_service().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        a.connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        wait_for_peers(&a, 1).await;

        drop(stream);
        wait_for_peers(&a, 0).await;
    }
}
