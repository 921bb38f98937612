//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Wire codec (fixed-width binary layout, key and peer-tag value types)
//! - Transactions (signed opaque payloads with their own proof of work)
//! - Blocks (merkle root, proof of work, origin signature)
//! - Blockchain (committed chain plus the mining candidate)
//! - Consensus (the single-writer event loop that owns the chain)

pub mod block;
pub mod blockchain;
pub mod codec;
pub mod consensus;
pub mod transaction;

pub use block::{Block, BlockError, BlockHeader, BLOCK_HEADER_SIZE};
pub use blockchain::{Blockchain, BlockchainError, ChainSummary};
pub use codec::{
    CodecError, NetworkKey, PeerTag, WireDecode, WireEncode, HASH_SIZE, IP_SIZE,
    NETWORK_KEY_SIZE,
};
pub use consensus::{Consensus, ConsensusHandle};
pub use transaction::{
    diff_transactions, insert_by_timestamp, Transaction, TransactionError, TransactionHeader,
    TRANSACTION_HEADER_SIZE,
};

/// Current wall-clock time as the 32-bit unix timestamp used on the wire
pub fn unix_timestamp() -> u32 {
    chrono::Utc::now().timestamp() as u32
}
