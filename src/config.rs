//! Node configuration
//!
//! Every field has a default, so a JSON config file only needs to name the
//! values it changes. Command-line flags are applied on top in `main`.

use crate::crypto::pow_prefix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::network::FrameMode;

/// Default TCP port for both listening and dialing
pub const DEFAULT_PORT: u16 = 9200;

/// Default number of leading zero bytes a block hash needs
pub const DEFAULT_BLOCK_DIFFICULTY: usize = 2;

/// Default number of leading zero bytes a transaction hash needs
pub const DEFAULT_TRANSACTION_DIFFICULTY: usize = 1;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid config file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Proof-of-work parameters shared by every node on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub block_difficulty: usize,
    pub transaction_difficulty: usize,
}

impl ChainParams {
    /// Required prefix for block header hashes
    pub fn block_pow(&self) -> Vec<u8> {
        pow_prefix(self.block_difficulty)
    }

    /// Required prefix for transaction header hashes
    pub fn transaction_pow(&self) -> Vec<u8> {
        pow_prefix(self.transaction_difficulty)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_difficulty: DEFAULT_BLOCK_DIFFICULTY,
            transaction_difficulty: DEFAULT_TRANSACTION_DIFFICULTY,
        }
    }
}

/// P2P node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address this node is reachable at; also its identity in the peer set
    pub address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port assumed for peers given without one
    pub peer_port: u16,
    /// Initial peers to connect to
    pub bootstrap_peers: Vec<String>,
    /// Outbound dial timeout in milliseconds
    pub dial_timeout_ms: u64,
    /// Dial a second time after a timeout
    pub dial_retry: bool,
    pub framing: FrameMode,
    /// Capacity of the queues feeding the consensus loop and the network
    pub queue_capacity: usize,
    pub params: ChainParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            peer_port: DEFAULT_PORT,
            bootstrap_peers: Vec::new(),
            dial_timeout_ms: 5_000,
            dial_retry: false,
            framing: FrameMode::default(),
            queue_capacity: 1,
            params: ChainParams::default(),
        }
    }
}

impl NodeConfig {
    /// Load a config file, filling omitted fields with defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// The socket address to listen on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// This node's own normalized address (`ip:port`)
    pub fn self_addr(&self) -> String {
        self.listen_addr().to_string()
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Queue capacity, never below one
    pub fn channel_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
