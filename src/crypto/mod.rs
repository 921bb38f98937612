//! Cryptographic utilities for the blockchain
//!
//! This module provides:
//! - SHA-256 hashing and the proof-of-work prefix check
//! - ECDSA key management (NIST P-224)
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{
    check_proof_of_work, pow_prefix, sha256, sha256_hex, Hash, EMPTY_HASH, HASH_SIZE, POW_PREFIX,
};
pub use keys::{join_pair, split_pair, verify_signature, KeyError, KeyPair};
pub use merkle::calculate_merkle_root;
