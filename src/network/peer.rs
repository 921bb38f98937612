//! Peer management for P2P networking
//!
//! The registry of connected peers, keyed by normalized `ip:port` address.
//! Only the network event loop touches it.

use crate::core::PeerTag;
use crate::network::message::Message;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
    #[error("Refusing to connect to self")]
    SelfConnection,
    #[error("Already connected to {0}")]
    AlreadyConnected(String),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Peer queue full")]
    QueueFull,
    #[error("Network service stopped")]
    ServiceStopped,
}

/// Normalize a peer address to `ip:port`.
///
/// A bare IP gets `default_port`; an `ip:port` keeps its own port.
pub fn normalize_addr(addr: &str, default_port: u16) -> Result<String, PeerError> {
    let addr = addr.trim();
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok(socket.to_string());
    }
    addr.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port).to_string())
        .map_err(|_| PeerError::InvalidAddress(addr.to_string()))
}

/// Shared record of when a peer was last heard from
#[derive(Clone, Debug)]
pub struct LastSeen(Arc<AtomicI64>);

impl LastSeen {
    pub fn now() -> Self {
        Self(Arc::new(AtomicI64::new(Utc::now().timestamp_millis())))
    }

    /// Record that a frame just arrived from the peer
    pub fn touch(&self) {
        self.0.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn get(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

/// Handle for sending frames to a peer
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub addr: String,
    /// Distinguishes successive connections to the same address
    pub conn_id: u64,
    tx: mpsc::Sender<Bytes>,
    /// Updated by the connection's reader on every frame
    pub last_seen: LastSeen,
}

impl PeerHandle {
    pub fn new(addr: String, conn_id: u64, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            addr,
            conn_id,
            tx,
            last_seen: LastSeen::now(),
        }
    }

    /// Queue a frame without waiting; a full queue drops it
    pub fn try_send(&self, frame: Bytes) -> Result<(), PeerError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PeerError::Disconnected,
        })
    }
}

/// A registered connection
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub handle: PeerHandle,
    /// Socket address of the remote end
    pub remote: SocketAddr,
    /// Whether we dialed this peer
    pub outbound: bool,
}

/// Peer listing for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub addr: String,
    pub remote: String,
    pub outbound: bool,
    pub last_seen: String,
}

/// Connected peers keyed by normalized address
#[derive(Debug)]
pub struct PeerRegistry {
    /// This node's own normalized address
    self_addr: String,
    /// Port assumed for addresses given without one
    peer_port: u16,
    peers: HashMap<String, PeerEntry>,
}

impl PeerRegistry {
    pub fn new(self_addr: String, peer_port: u16) -> Self {
        Self {
            self_addr,
            peer_port,
            peers: HashMap::new(),
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    /// Normalized address of an inbound connection's remote end
    pub fn inbound_addr(&self, remote: &SocketAddr) -> String {
        SocketAddr::new(remote.ip(), self.peer_port).to_string()
    }

    /// Check that `addr` is neither this node nor an existing peer
    pub fn check_new(&self, addr: &str) -> Result<(), PeerError> {
        if addr == self.self_addr {
            return Err(PeerError::SelfConnection);
        }
        if self.peers.contains_key(addr) {
            return Err(PeerError::AlreadyConnected(addr.to_string()));
        }
        Ok(())
    }

    /// Add a new peer
    pub fn insert(
        &mut self,
        handle: PeerHandle,
        remote: SocketAddr,
        outbound: bool,
    ) -> Result<(), PeerError> {
        self.check_new(&handle.addr)?;

        info!("Added peer: {} (outbound: {})", handle.addr, outbound);
        self.peers.insert(
            handle.addr.clone(),
            PeerEntry {
                handle,
                remote,
                outbound,
            },
        );
        Ok(())
    }

    /// Remove a peer if `conn_id` is still its current connection
    pub fn remove(&mut self, addr: &str, conn_id: u64) -> bool {
        match self.peers.get(addr) {
            Some(entry) if entry.handle.conn_id == conn_id => {
                self.peers.remove(addr);
                info!("Removed peer: {}", addr);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .peers
            .iter()
            .map(|(addr, entry)| PeerSummary {
                addr: addr.clone(),
                remote: entry.remote.to_string(),
                outbound: entry.outbound,
                last_seen: entry.handle.last_seen.get().to_rfc3339(),
            })
            .collect();
        peers.sort_by(|a, b| a.addr.cmp(&b.addr));
        peers
    }

    /// Send `message` to every peer except the one it came from.
    ///
    /// The frame is encoded once with this node as its origin. Returns the
    /// number of peers the frame was queued for.
    pub fn broadcast(&self, message: &Message) -> usize {
        let skip = message.origin;
        let frame = message
            .clone()
            .with_origin(PeerTag::from_addr(&self.self_addr))
            .to_bytes();

        let mut sent = 0;
        for (addr, entry) in self.peers.iter() {
            if PeerTag::from_addr(addr) == skip {
                continue;
            }

            match entry.handle.try_send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Dropping {} for {}: {}", message.type_name(), addr, e),
            }
        }

        debug!("Broadcast {} to {} peer(s)", message.type_name(), sent);
        sent
    }
}
