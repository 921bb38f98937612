//! mesh-chain: a minimal peer-to-peer proof-of-work blockchain node
//!
//! This crate provides:
//! - A fixed-width binary wire format for blocks, transactions and messages
//! - ECDSA signatures on NIST P-224 over SHA-256 hashes
//! - An order-sensitive Merkle root and prefix-match proof of work
//! - A preemptible miner that always works on the newest candidate block
//! - A single-writer consensus loop that owns the chain
//! - TCP gossip to a manually configured set of peers
//!
//! # Example
//!
//! ```no_run
//! use mesh_chain::config::NodeConfig;
//! use mesh_chain::node::Node;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let node = Node::start(NodeConfig::default()).await?;
//! node.submit_payload(b"hello".to_vec()).await?;
//!
//! let status = node.status().await?;
//! println!("Height: {}", status.chain.height);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod node;

// Re-export commonly used types
pub use config::{ChainParams, NodeConfig};
pub use core::{Block, Blockchain, NetworkKey, PeerTag, Transaction};
pub use crypto::KeyPair;
pub use network::{Message, MessageKind};
pub use node::{Node, NodeError, NodeStatus};
