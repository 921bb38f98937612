//! Transaction implementation
//!
//! A transaction carries an opaque payload signed by its sender. It is only
//! accepted when the payload matches the hash committed in the header, the
//! header hash satisfies the transaction proof of work, and the signature
//! verifies against the sender key.

use crate::core::codec::{
    CodecError, NetworkKey, PeerTag, WireDecode, WireEncode, WireReader, HASH_SIZE, IP_SIZE,
    NETWORK_KEY_SIZE,
};
use crate::core::unix_timestamp;
use crate::crypto::{check_proof_of_work, sha256, verify_signature, Hash, KeyError, KeyPair};
use bytes::{BufMut, BytesMut};
use std::collections::HashSet;
use thiserror::Error;

/// Serialized transaction header size
pub const TRANSACTION_HEADER_SIZE: usize = NETWORK_KEY_SIZE /* from key */
    + NETWORK_KEY_SIZE /* to key */
    + 4 /* timestamp */
    + HASH_SIZE /* payload hash */
    + 4 /* payload length */
    + 4 /* nonce */;

/// Transaction validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Payload hash does not match header")]
    PayloadHashMismatch,
    #[error("Insufficient proof of work")]
    InsufficientProofOfWork,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Signed, hashed part of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHeader {
    /// Sender public key
    pub from: NetworkKey,
    /// Recipient public key (all zero when there is none)
    pub to: NetworkKey,
    pub timestamp: u32,
    pub nonce: u32,
    /// SHA-256 of the payload
    pub payload_hash: Hash,
    pub payload_length: u32,
}

impl TransactionHeader {
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }
}

impl WireEncode for TransactionHeader {
    fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(TRANSACTION_HEADER_SIZE);
        dst.put_slice(self.from.as_bytes());
        dst.put_slice(self.to.as_bytes());
        dst.put_u32_le(self.timestamp);
        dst.put_slice(&self.payload_hash);
        dst.put_u32_le(self.payload_length);
        dst.put_u32_le(self.nonce);
    }
}

impl WireDecode for TransactionHeader {
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let mut reader = WireReader::new(src);
        let from = NetworkKey(reader.array("transaction sender")?);
        let to = NetworkKey(reader.array("transaction recipient")?);
        let timestamp = reader.u32_le("transaction timestamp")?;
        let payload_hash = reader.array("payload hash")?;
        let payload_length = reader.u32_le("payload length")?;
        let nonce = reader.u32_le("transaction nonce")?;

        let header = Self {
            from,
            to,
            timestamp,
            nonce,
            payload_hash,
            payload_length,
        };
        Ok((header, reader.into_rest()))
    }
}

/// A transaction as it travels between nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub header: TransactionHeader,
    pub signature: NetworkKey,
    pub payload: Vec<u8>,
    /// Peer this transaction was relayed from
    pub origin: PeerTag,
}

impl Transaction {
    /// Create an unsigned transaction stamped with the current time
    pub fn new(
        from: NetworkKey,
        to: Option<NetworkKey>,
        payload: Vec<u8>,
    ) -> Result<Self, TransactionError> {
        let payload_length = u32::try_from(payload.len())
            .map_err(|_| TransactionError::PayloadTooLarge(payload.len()))?;

        Ok(Self {
            header: TransactionHeader {
                from,
                to: to.unwrap_or_default(),
                timestamp: unix_timestamp(),
                nonce: 0,
                payload_hash: sha256(&payload),
                payload_length,
            },
            signature: NetworkKey::ZERO,
            payload,
            origin: PeerTag::default(),
        })
    }

    /// Build a transaction from `keypair`, search its nonce and sign it
    pub fn create_signed(
        keypair: &KeyPair,
        payload: Vec<u8>,
        pow_prefix: &[u8],
    ) -> Result<Self, TransactionError> {
        let mut tx = Self::new(*keypair.public_key(), None, payload)?;
        tx.generate_nonce(pow_prefix);
        tx.sign(keypair).map_err(|_| TransactionError::InvalidSignature)?;
        Ok(tx)
    }

    /// Hash of the header; what gets signed and proven
    pub fn hash(&self) -> Hash {
        self.header.hash()
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

    /// Check payload hash, proof of work and signature
    pub fn verify(&self, pow_prefix: &[u8]) -> Result<(), TransactionError> {
        if sha256(&self.payload) != self.header.payload_hash {
            return Err(TransactionError::PayloadHashMismatch);
        }

        let header_hash = self.hash();
        if !check_proof_of_work(pow_prefix, &header_hash) {
            return Err(TransactionError::InsufficientProofOfWork);
        }

        if !verify_signature(&self.header.from, &self.signature, &header_hash) {
            return Err(TransactionError::InvalidSignature);
        }

        Ok(())
    }

    pub fn is_valid(&self, pow_prefix: &[u8]) -> bool {
        self.verify(pow_prefix).is_ok()
    }

    /// Size of this transaction on the wire
    pub fn encoded_size(&self) -> usize {
        TRANSACTION_HEADER_SIZE + NETWORK_KEY_SIZE + self.payload.len() + IP_SIZE
    }
}

impl WireEncode for Transaction {
    fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_size());
        self.header.encode_to(dst);
        dst.put_slice(self.signature.as_bytes());
        dst.put_slice(&self.payload);
        dst.put_slice(&self.origin.0);
    }
}

impl WireDecode for Transaction {
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (header, rest) = TransactionHeader::decode(src)?;
        let mut reader = WireReader::new(rest);
        let signature = NetworkKey(reader.array("transaction signature")?);
        let payload = reader
            .bytes("transaction payload", header.payload_length as usize)?
            .to_vec();
        let origin = PeerTag(reader.array("transaction origin")?);

        let tx = Self {
            header,
            signature,
            payload,
            origin,
        };
        Ok((tx, reader.into_rest()))
    }
}

// =============================================================================
// Transaction lists
// =============================================================================

/// Insert `tx` before the first transaction with a later timestamp.
///
/// Transactions with equal timestamps keep arrival order.
pub fn insert_by_timestamp(transactions: &mut Vec<Transaction>, tx: Transaction) {
    let at = transactions.partition_point(|t| t.header.timestamp <= tx.header.timestamp);
    transactions.insert(at, tx);
}

/// Transactions of `pending` whose signature does not appear in `confirmed`,
/// in `pending` order
pub fn diff_transactions(pending: &[Transaction], confirmed: &[Transaction]) -> Vec<Transaction> {
    let confirmed: HashSet<&NetworkKey> = confirmed.iter().map(|tx| &tx.signature).collect();
    pending
        .iter()
        .filter(|tx| !confirmed.contains(&tx.signature))
        .cloned()
        .collect()
}

/// Encode transactions back to back
pub fn encode_transactions(transactions: &[Transaction], dst: &mut BytesMut) {
    for tx in transactions {
        tx.encode_to(dst);
    }
}

/// Decode a buffer of concatenated transactions until it is exhausted
pub fn decode_transactions(mut src: &[u8]) -> Result<Vec<Transaction>, CodecError> {
    let mut transactions = Vec::new();
    while !src.is_empty() {
        let (tx, rest) = Transaction::decode(src)?;
        transactions.push(tx);
        src = rest;
    }
    Ok(transactions)
}
