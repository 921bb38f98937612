//! Consensus event loop
//!
//! `Consensus` owns the `Blockchain` and processes one event at a time:
//! transactions and blocks from the network or the local console, blocks
//! from the miner, and status queries. Accepted items are queued for
//! broadcast and every change to the candidate block is handed to the
//! miner.

use crate::core::block::Block;
use crate::core::blockchain::{Blockchain, BlockchainError, ChainSummary};
use crate::core::transaction::Transaction;
use crate::mining::MinerHandle;
use crate::network::Message;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

/// Cloneable front end of the consensus loop
#[derive(Clone)]
pub struct ConsensusHandle {
    transactions: mpsc::Sender<Transaction>,
    blocks: mpsc::Sender<Block>,
    queries: mpsc::Sender<oneshot::Sender<ChainSummary>>,
}

impl ConsensusHandle {
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), BlockchainError> {
        self.transactions
            .send(tx)
            .await
            .map_err(|_| BlockchainError::ConsensusStopped)
    }

    pub async fn submit_block(&self, block: Block) -> Result<(), BlockchainError> {
        self.blocks
            .send(block)
            .await
            .map_err(|_| BlockchainError::ConsensusStopped)
    }

    /// Sender the miner emits found blocks on
    pub fn block_sender(&self) -> mpsc::Sender<Block> {
        self.blocks.clone()
    }

    pub async fn summary(&self) -> Result<ChainSummary, BlockchainError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queries
            .send(reply_tx)
            .await
            .map_err(|_| BlockchainError::ConsensusStopped)?;
        reply_rx.await.map_err(|_| BlockchainError::ConsensusStopped)
    }
}

/// The consensus event loop
pub struct Consensus {
    chain: Blockchain,
    transactions: mpsc::Receiver<Transaction>,
    blocks: mpsc::Receiver<Block>,
    queries: mpsc::Receiver<oneshot::Sender<ChainSummary>>,
    broadcast: mpsc::Sender<Message>,
}

impl Consensus {
    /// Wrap `chain` in an event loop whose input queues hold `capacity` items
    pub fn new(
        chain: Blockchain,
        capacity: usize,
        broadcast: mpsc::Sender<Message>,
    ) -> (Self, ConsensusHandle) {
        let capacity = capacity.max(1);
        let (tx_tx, tx_rx) = mpsc::channel(capacity);
        let (block_tx, block_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);

        let consensus = Self {
            chain,
            transactions: tx_rx,
            blocks: block_rx,
            queries: query_rx,
            broadcast,
        };
        let handle = ConsensusHandle {
            transactions: tx_tx,
            blocks: block_tx,
            queries: query_tx,
        };
        (consensus, handle)
    }

    /// Run until every handle (and the miner) is gone
    pub async fn run(mut self, mut miner: MinerHandle) {
        miner.submit(self.chain.current_block().clone());

        loop {
            tokio::select! {
                Some(tx) = self.transactions.recv() => {
                    self.on_transaction(tx, &mut miner).await;
                }
                Some(block) = self.blocks.recv() => {
                    self.on_block(block, &mut miner).await;
                }
                Some(reply) = self.queries.recv() => {
                    let _ = reply.send(self.chain.summary());
                }
                else => break,
            }
        }

        debug!("Consensus loop exiting");
    }

    async fn on_transaction(&mut self, tx: Transaction, miner: &mut MinerHandle) {
        let announce = Message::send_transaction(&tx);
        let origin = tx.origin;

        match self.chain.add_transaction(tx) {
            Ok(()) => {
                info!(
                    "Transaction from {} accepted ({} pending)",
                    origin,
                    self.chain.current_block().tx_count()
                );
                miner.submit(self.chain.current_block().clone());
                self.announce(announce).await;
            }
            Err(e) if e.is_duplicate() => debug!("Ignoring transaction from {}: {}", origin, e),
            Err(e) => warn!("Rejected transaction from {}: {}", origin, e),
        }
    }

    async fn on_block(&mut self, block: Block, miner: &mut MinerHandle) {
        let origin = block.origin;

        let announce = match self.chain.add_block(block) {
            Ok(committed) => {
                info!(
                    "Block {} from {} accepted ({} transactions)",
                    committed.hash_hex(),
                    origin,
                    committed.tx_count()
                );
                Message::send_block(committed)
            }
            Err(e) if e.is_duplicate() => {
                debug!("Ignoring block from {}: {}", origin, e);
                return;
            }
            Err(e) => {
                warn!("Rejected block from {}: {}", origin, e);
                return;
            }
        };

        info!("Chain height is now {}", self.chain.height());
        miner.submit(self.chain.current_block().clone());
        self.announce(announce).await;
    }

    async fn announce(&self, message: Message) {
        if self.broadcast.send(message).await.is_err() {
            warn!("Broadcast queue closed; announcement dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::block::tests::mined_block;
    use crate::core::codec::{PeerTag, WireDecode};
    use crate::core::transaction::tests::signed_tx;
    use crate::crypto::{KeyPair, EMPTY_HASH};
    use crate::mining;
    use crate::network::MessageKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn params() -> ChainParams {
        ChainParams {
            block_difficulty: 1,
            transaction_difficulty: 1,
        }
    }

    fn start(keypair: Arc<KeyPair>) -> (ConsensusHandle, mpsc::Receiver<Message>) {
        let chain = Blockchain::new(*keypair.public_key(), params());
        let (broadcast_tx, broadcast_rx) = mpsc::channel(8);
        let (consensus, handle) = Consensus::new(chain, 8, broadcast_tx);

        let miner = mining::spawn(keypair, params().block_pow(), handle.block_sender()).unwrap();
        tokio::spawn(consensus.run(miner));
        (handle, broadcast_rx)
    }

    async fn next_broadcast(rx: &mut mpsc::Receiver<Message>) -> Message {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_peer_block_is_appended_and_relayed() {
        let local = Arc::new(KeyPair::generate());
        let (handle, mut broadcast_rx) = start(local);

        let peer = KeyPair::generate();
        let mut b1 = mined_block(&peer, EMPTY_HASH, &["from peer"], 1);
        b1.origin = PeerTag::from_addr("10.0.0.2:9200");
        handle.submit_block(b1.clone()).await.unwrap();

        let relayed = next_broadcast(&mut broadcast_rx).await;
        assert_eq!(relayed.kind, MessageKind::SendBlock);
        assert_eq!(relayed.origin, b1.origin);
        let (decoded, _) = Block::decode(&relayed.data).unwrap();
        assert_eq!(decoded.signature, b1.signature);

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.height, 1);
        assert_eq!(summary.tip_hash, b1.hash_hex());

        // A second copy is ignored and not relayed again
        handle.submit_block(b1).await.unwrap();
        assert_eq!(handle.summary().await.unwrap().height, 1);
        assert!(broadcast_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_transaction_is_mined() {
        let local = Arc::new(KeyPair::generate());
        let (handle, mut broadcast_rx) = start(local.clone());

        let tx = signed_tx(&local, "hello");
        handle.submit_transaction(tx.clone()).await.unwrap();

        let announced = next_broadcast(&mut broadcast_rx).await;
        assert_eq!(announced.kind, MessageKind::SendTransaction);
        assert!(announced.origin.is_empty());

        let mined = next_broadcast(&mut broadcast_rx).await;
        assert_eq!(mined.kind, MessageKind::SendBlock);
        let (block, _) = Block::decode(&mined.data).unwrap();
        assert!(block.contains_transaction(&tx.signature));
        assert_eq!(block.header.origin, *local.public_key());

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.height, 1);
        assert_eq!(summary.pending_transactions, 0);
    }

    #[tokio::test]
    async fn test_invalid_items_are_dropped() {
        let local = Arc::new(KeyPair::generate());
        let (handle, mut broadcast_rx) = start(local.clone());

        let mut tx = signed_tx(&local, "hello");
        tx.payload = b"changed".to_vec();
        handle.submit_transaction(tx).await.unwrap();

        let orphan = mined_block(&local, crate::crypto::sha256(b"elsewhere"), &["x"], 1);
        handle.submit_block(orphan).await.unwrap();

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.height, 0);
        assert_eq!(summary.pending_transactions, 0);
        assert!(broadcast_rx.try_recv().is_err());
    }
}
