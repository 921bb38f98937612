//! Node application context
//!
//! `Node::start` binds the listener and wires the network service, the
//! consensus loop, the miner and the inbound dispatcher together. The
//! returned `Node` is the handle the console (or a test) drives.

use crate::config::NodeConfig;
use crate::core::{
    Block, Blockchain, BlockchainError, ChainSummary, Consensus, ConsensusHandle, NetworkKey,
    Transaction, TransactionError, WireDecode,
};
use crate::crypto::KeyPair;
use crate::mining;
use crate::network::{
    Message, MessageKind, NetworkHandle, NetworkService, PeerError, PeerSummary, Server,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to start miner: {0}")]
    Miner(#[source] io::Error),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
    #[error("Network error: {0}")]
    Network(#[from] PeerError),
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Status snapshot printed by the console
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub public_key: NetworkKey,
    pub chain: ChainSummary,
    pub peers: Vec<PeerSummary>,
}

/// A running node
pub struct Node {
    config: NodeConfig,
    keypair: Arc<KeyPair>,
    local_addr: SocketAddr,
    self_addr: String,
    consensus: ConsensusHandle,
    network: NetworkHandle,
}

impl Node {
    /// Start a node with a freshly generated key pair
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        Self::start_with_keypair(config, KeyPair::generate()).await
    }

    /// Start a node signing with `keypair`.
    ///
    /// Failing to bind the listening port is the only fatal network error.
    pub async fn start_with_keypair(
        config: NodeConfig,
        keypair: KeyPair,
    ) -> Result<Self, NodeError> {
        let keypair = Arc::new(keypair);
        let listen_addr = config.listen_addr();

        let bind_error = |source: io::Error| NodeError::Bind {
            addr: listen_addr,
            source,
        };
        let server = Server::bind(listen_addr).await.map_err(bind_error)?;
        let local_addr = server.local_addr().map_err(bind_error)?;
        let self_addr = SocketAddr::new(config.address, local_addr.port()).to_string();
        let capacity = config.channel_capacity();

        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (network_service, network) =
            NetworkService::new(&config, server, self_addr.clone(), inbound_tx);

        let chain = Blockchain::new(*keypair.public_key(), config.params);
        let (consensus_loop, consensus) =
            Consensus::new(chain, capacity, network.broadcast_sender());

        let miner = mining::spawn(
            keypair.clone(),
            config.params.block_pow(),
            consensus.block_sender(),
        )
        .map_err(NodeError::Miner)?;

        tokio::spawn(network_service.run());
        tokio::spawn(consensus_loop.run(miner));
        tokio::spawn(dispatch(inbound_rx, consensus.clone()));

        info!(
            "Node {} started with key {}",
            self_addr,
            keypair.public_key().short_hex()
        );

        let node = Self {
            config,
            keypair,
            local_addr,
            self_addr,
            consensus,
            network,
        };

        for peer in &node.config.bootstrap_peers {
            node.connect(peer).await?;
        }

        Ok(node)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's normalized address, as peers and origin tags see it
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn public_key(&self) -> &NetworkKey {
        self.keypair.public_key()
    }

    pub fn consensus(&self) -> &ConsensusHandle {
        &self.consensus
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    /// Ask the network to connect to `addr` (`ip` or `ip:port`)
    pub async fn connect(&self, addr: &str) -> Result<(), NodeError> {
        self.network.connect(addr).await?;
        Ok(())
    }

    /// Sign and prove a transaction carrying `payload` and submit it.
    ///
    /// Returns the transaction's signature, which identifies it.
    pub async fn submit_payload(&self, payload: Vec<u8>) -> Result<NetworkKey, NodeError> {
        let keypair = self.keypair.clone();
        let prefix = self.config.params.transaction_pow();

        let tx = tokio::task::spawn_blocking(move || {
            Transaction::create_signed(&keypair, payload, &prefix)
        })
        .await??;

        let signature = tx.signature;
        debug!("Submitting transaction {}", signature.short_hex());
        self.consensus.submit_transaction(tx).await?;
        Ok(signature)
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        Ok(NodeStatus {
            address: self.self_addr.clone(),
            public_key: *self.keypair.public_key(),
            chain: self.consensus.summary().await?,
            peers: self.network.peers().await?,
        })
    }
}

/// Decode messages from peers and hand them to the consensus loop
async fn dispatch(mut inbound: mpsc::Receiver<Message>, consensus: ConsensusHandle) {
    while let Some(message) = inbound.recv().await {
        let submitted = match message.kind {
            MessageKind::SendTransaction => match Transaction::decode(&message.data) {
                Ok((mut tx, _)) => {
                    tx.origin = message.origin;
                    consensus.submit_transaction(tx).await
                }
                Err(e) => {
                    warn!("Malformed transaction from {}: {}", message.origin, e);
                    continue;
                }
            },
            MessageKind::SendBlock => match Block::decode(&message.data) {
                Ok((mut block, _)) => {
                    block.origin = message.origin;
                    consensus.submit_block(block).await
                }
                Err(e) => {
                    warn!("Malformed block from {}: {}", message.origin, e);
                    continue;
                }
            },
            kind => {
                debug!(
                    "{} from {} is not implemented",
                    kind.type_name(),
                    message.origin
                );
                continue;
            }
        };

        if submitted.is_err() {
            break;
        }
    }
    debug!("Dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::crypto::pow_prefix;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::time::sleep;

    fn test_config(transaction_difficulty: usize) -> NodeConfig {
        NodeConfig {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            queue_capacity: 8,
            params: ChainParams {
                block_difficulty: 1,
                transaction_difficulty,
            },
            ..Default::default()
        }
    }

    async fn wait_for<F>(node: &Node, mut done: F) -> NodeStatus
    where
        F: FnMut(&NodeStatus) -> bool,
    {
        for _ in 0..500 {
            let status = node.status().await.unwrap();
            if done(&status) {
                return status;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("Node {} never reached the expected state", node.self_addr());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NodeConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config(1)
        };

        assert!(matches!(
            Node::start(config).await,
            Err(NodeError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_submitted_payload_is_mined() {
        let node = Node::start(test_config(1)).await.unwrap();
        assert_ne!(node.local_addr().port(), 0);
        assert!(node.self_addr().starts_with("127.0.0.1:"));

        node.submit_payload(b"hello".to_vec()).await.unwrap();

        let status = wait_for(&node, |s| s.chain.height == 1).await;
        assert_eq!(status.chain.pending_transactions, 0);
        assert!(status.peers.is_empty());
    }

    #[tokio::test]
    async fn test_block_propagates_to_peer() {
        let a = Node::start(test_config(1)).await.unwrap();
        // B demands more transaction work so it never mines A's transaction itself
        let b = Node::start(test_config(2)).await.unwrap();

        b.connect(a.self_addr()).await.unwrap();
        wait_for(&a, |s| s.peers.len() == 1).await;
        wait_for(&b, |s| s.peers.len() == 1).await;

        let keypair = KeyPair::generate();
        let tx = (0..)
            .map(|i| {
                Transaction::create_signed(&keypair, format!("tx {}", i).into_bytes(), &pow_prefix(1))
                    .unwrap()
            })
            .find(|tx| tx.hash()[1] != 0)
            .unwrap();
        a.consensus().submit_transaction(tx).await.unwrap();

        let a_status = wait_for(&a, |s| s.chain.height == 1).await;
        let b_status = wait_for(&b, |s| s.chain.height == 1).await;
        assert_eq!(b_status.chain.tip_hash, a_status.chain.tip_hash);
        assert_eq!(b_status.chain.pending_transactions, 0);
    }
}
