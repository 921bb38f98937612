//! Blockchain implementation
//!
//! Holds the committed blocks and the one block currently being mined.
//! Only the consensus loop owns a `Blockchain`; every method here runs on
//! that single writer.

use crate::config::ChainParams;
use crate::core::block::{Block, BlockError};
use crate::core::codec::NetworkKey;
use crate::core::transaction::{diff_transactions, Transaction, TransactionError};
use crate::crypto::{Hash, EMPTY_HASH};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("Duplicate transaction")]
    DuplicateTransaction,
    #[error("Duplicate block")]
    DuplicateBlock,
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("Missing intermediate blocks between tip {tip} and {previous}")]
    MissingBlocks { previous: String, tip: String },
    #[error("Consensus loop stopped")]
    ConsensusStopped,
}

impl BlockchainError {
    /// Duplicates are expected on a gossip network and not worth a warning
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateTransaction | Self::DuplicateBlock)
    }
}

/// Snapshot of the chain for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub height: usize,
    pub tip_hash: String,
    pub pending_transactions: usize,
    pub candidate_merkle_root: String,
}

/// The committed chain plus the mining candidate
#[derive(Debug, Clone)]
pub struct Blockchain {
    params: ChainParams,
    /// Public key placed in every candidate this node mines
    origin: NetworkKey,
    blocks: Vec<Block>,
    /// Signatures of every committed block
    known_blocks: HashSet<NetworkKey>,
    current: Block,
}

impl Blockchain {
    /// Create an empty chain whose first candidate builds on the zero hash
    pub fn new(origin: NetworkKey, params: ChainParams) -> Self {
        Self {
            params,
            origin,
            blocks: Vec::new(),
            known_blocks: HashSet::new(),
            current: Block::new(origin, EMPTY_HASH),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Hash of the last committed block, or the zero hash for an empty chain
    pub fn tip_hash(&self) -> Hash {
        self.blocks.last().map(Block::hash).unwrap_or(EMPTY_HASH)
    }

    /// Number of committed blocks
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// The block currently being mined
    pub fn current_block(&self) -> &Block {
        &self.current
    }

    pub fn contains_block(&self, signature: &NetworkKey) -> bool {
        self.known_blocks.contains(signature)
    }

    /// Add a verified transaction to the candidate block
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), BlockchainError> {
        if self.current.contains_transaction(&tx.signature) {
            return Err(BlockchainError::DuplicateTransaction);
        }
        tx.verify(&self.params.transaction_pow())?;

        self.current.add_transaction(tx);
        Ok(())
    }

    /// Commit a block on top of the tip.
    ///
    /// The candidate is replaced by a fresh one on the new tip, carrying the
    /// pending transactions the block did not include.
    pub fn add_block(&mut self, block: Block) -> Result<&Block, BlockchainError> {
        if self.known_blocks.contains(&block.signature) {
            return Err(BlockchainError::DuplicateBlock);
        }
        block.verify(&self.params.block_pow())?;

        let tip = self.tip_hash();
        if block.header.previous_hash != tip {
            return Err(BlockchainError::MissingBlocks {
                previous: hex::encode(block.header.previous_hash),
                tip: hex::encode(tip),
            });
        }

        let carried = if block.header.merkle_root != self.current.header.merkle_root {
            diff_transactions(&self.current.transactions, &block.transactions)
        } else {
            Vec::new()
        };

        let mut next = Block::new(self.origin, block.hash());
        next.transactions = carried;
        next.update_merkle_root();
        self.current = next;

        self.known_blocks.insert(block.signature);
        self.blocks.push(block);
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            height: self.height(),
            tip_hash: hex::encode(self.tip_hash()),
            pending_transactions: self.current.tx_count(),
            candidate_merkle_root: hex::encode(self.current.header.merkle_root),
        }
    }
}
