//! Block implementation for the blockchain
//!
//! A block contains a header with metadata, the origin node's signature
//! over the header hash, and an ordered list of transactions.

use crate::core::codec::{
    CodecError, NetworkKey, PeerTag, WireDecode, WireEncode, WireReader, HASH_SIZE,
    NETWORK_KEY_SIZE,
};
use crate::core::transaction::{
    decode_transactions, encode_transactions, insert_by_timestamp, Transaction,
};
use crate::crypto::{
    calculate_merkle_root, check_proof_of_work, sha256, verify_signature, Hash, KeyError, KeyPair,
    EMPTY_HASH,
};
use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Serialized block header size
pub const BLOCK_HEADER_SIZE: usize = NETWORK_KEY_SIZE /* origin key */
    + HASH_SIZE /* previous block hash */
    + HASH_SIZE /* merkle root */
    + 4 /* timestamp */
    + 4 /* nonce */;

/// Block validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Invalid proof of work")]
    InsufficientProofOfWork,
    #[error("Invalid block signature")]
    InvalidSignature,
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Public key of the node that mined the block
    pub origin: NetworkKey,
    /// Hash of the previous block (all zero for the first block)
    pub previous_hash: Hash,
    /// Merkle root of all transactions
    pub merkle_root: Hash,
    pub timestamp: u32,
    /// Nonce used for proof of work
    pub nonce: u32,
}

impl BlockHeader {
    /// Calculate the hash of the block header
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }
}

impl WireEncode for BlockHeader {
    fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(BLOCK_HEADER_SIZE);
        dst.put_slice(self.origin.as_bytes());
        dst.put_slice(&self.previous_hash);
        dst.put_slice(&self.merkle_root);
        dst.put_u32_le(self.timestamp);
        dst.put_u32_le(self.nonce);
    }
}

impl WireDecode for BlockHeader {
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let mut reader = WireReader::new(src);
        let origin = NetworkKey(reader.array("block origin")?);
        let previous_hash = reader.array("previous block hash")?;
        let merkle_root = reader.array("merkle root")?;
        let timestamp = reader.u32_le("block timestamp")?;
        let nonce = reader.u32_le("block nonce")?;

        let header = Self {
            origin,
            previous_hash,
            merkle_root,
            timestamp,
            nonce,
        };
        Ok((header, reader.into_rest()))
    }
}

/// A block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub signature: NetworkKey,
    pub transactions: Vec<Transaction>,
    /// Peer this block was relayed from; not part of the wire layout
    pub origin: PeerTag,
}

impl Block {
    /// Create an empty, unmined candidate on top of `previous_hash`
    pub fn new(origin: NetworkKey, previous_hash: Hash) -> Self {
        Self {
            header: BlockHeader {
                origin,
                previous_hash,
                merkle_root: EMPTY_HASH,
                timestamp: 0,
                nonce: 0,
            },
            signature: NetworkKey::ZERO,
            transactions: Vec::new(),
            origin: PeerTag::default(),
        }
    }

    /// Calculate the hash of the block header
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Calculate the merkle root from transactions
    pub fn generate_merkle_root(&self) -> Option<Hash> {
        let hashes: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        calculate_merkle_root(&hashes)
    }

    /// Store the current transactions' merkle root in the header
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.generate_merkle_root().unwrap_or(EMPTY_HASH);
    }

    /// Add a transaction in timestamp order and refresh the merkle root
    pub fn add_transaction(&mut self, tx: Transaction) {
        insert_by_timestamp(&mut self.transactions, tx);
        self.update_merkle_root();
    }

    pub fn contains_transaction(&self, signature: &NetworkKey) -> bool {
        self.transactions.iter().any(|tx| &tx.signature == signature)
    }

    /// Search nonces until the header hash satisfies `prefix`
    pub fn generate_nonce(&mut self, prefix: &[u8]) -> u32 {
        while !check_proof_of_work(prefix, &self.hash()) {
            self.header.nonce = self.header.nonce.wrapping_add(1);
        }
        self.header.nonce
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), KeyError> {
        self.signature = keypair.sign(&self.hash())?;
        Ok(())
    }

    /// Verify the block's merkle root.
    ///
    /// A block without transactions has no root and never verifies.
    pub fn verify_merkle_root(&self) -> bool {
        self.generate_merkle_root()
            .is_some_and(|root| root == self.header.merkle_root)
    }

    /// Full validation: merkle root, proof of work and origin signature
    pub fn verify(&self, pow_prefix: &[u8]) -> Result<(), BlockError> {
        if !self.verify_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }

        let header_hash = self.hash();
        if !check_proof_of_work(pow_prefix, &header_hash) {
            return Err(BlockError::InsufficientProofOfWork);
        }

        if !verify_signature(&self.header.origin, &self.signature, &header_hash) {
            return Err(BlockError::InvalidSignature);
        }

        Ok(())
    }

    pub fn is_valid(&self, pow_prefix: &[u8]) -> bool {
        self.verify(pow_prefix).is_ok()
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Hex of the block hash, for logs and status output
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}

impl WireEncode for Block {
    fn encode_to(&self, dst: &mut BytesMut) {
        self.header.encode_to(dst);
        dst.put_slice(self.signature.as_bytes());
        encode_transactions(&self.transactions, dst);
    }
}

impl WireDecode for Block {
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (header, rest) = BlockHeader::decode(src)?;
        let mut reader = WireReader::new(rest);
        let signature = NetworkKey(reader.array("block signature")?);
        let transactions = decode_transactions(reader.into_rest())?;

        let block = Self {
            header,
            signature,
            transactions,
            origin: PeerTag::default(),
        };
        // The transaction stream runs to the end of the buffer
        Ok((block, &[]))
    }
}
