//! P2P Networking module
//!
//! Provides peer-to-peer networking for gossiping blocks and transactions.
//!
//! # Features
//! - TCP-based peer connections, no handshake
//! - Length-prefixed or legacy read-per-message framing
//! - Broadcast to every peer except the message's origin
//! - Manually supplied peer addresses only

pub mod message;
pub mod peer;
pub mod server;
pub mod service;

pub use message::{Message, MessageKind, MESSAGE_HEADER_SIZE, MIN_MESSAGE_SIZE};
pub use peer::{normalize_addr, LastSeen, PeerError, PeerHandle, PeerRegistry, PeerSummary};
pub use server::{
    connect_to_peer, spawn_peer_io, FrameCodec, FrameMode, PeerClosed, Server, MAX_FRAME_SIZE,
};
pub use service::{NetworkHandle, NetworkService};
