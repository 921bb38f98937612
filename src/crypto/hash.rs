//! Cryptographic hashing utilities for the blockchain
//!
//! Provides SHA-256 hashing used for block and transaction hashes and the
//! merkle tree, plus the proof-of-work prefix check.

use sha2::{Digest, Sha256};

pub use crate::core::codec::HASH_SIZE;

/// A SHA-256 digest
pub type Hash = [u8; HASH_SIZE];

/// Previous-hash value of the first block in a chain
pub const EMPTY_HASH: Hash = [0u8; HASH_SIZE];

/// Byte every proof-of-work prefix is made of
pub const POW_PREFIX: u8 = 0;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Required hash prefix for a difficulty (number of leading `POW_PREFIX` bytes)
pub fn pow_prefix(difficulty: usize) -> Vec<u8> {
    vec![POW_PREFIX; difficulty]
}

/// Checks a hash against a proof-of-work prefix.
///
/// An empty prefix is always satisfied; otherwise the leading bytes of the
/// hash must equal the prefix exactly.
pub fn check_proof_of_work(prefix: &[u8], hash: &[u8]) -> bool {
    if prefix.is_empty() {
        return true;
    }
    hash.get(..prefix.len()).is_some_and(|lead| lead == prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_empty_prefix_always_passes() {
        assert!(check_proof_of_work(&[], &sha256(b"anything")));
        assert!(check_proof_of_work(&[], &[]));
    }

    #[test]
    fn test_prefix_match() {
        let hash = [0x00, 0x00, 0x0F, 0xFF];
        assert!(check_proof_of_work(&pow_prefix(1), &hash));
        assert!(check_proof_of_work(&pow_prefix(2), &hash));
        assert!(!check_proof_of_work(&pow_prefix(3), &hash));
        assert!(check_proof_of_work(&[0x00, 0x00, 0x0F], &hash));
    }

    #[test]
    fn test_prefix_longer_than_hash() {
        assert!(!check_proof_of_work(&pow_prefix(5), &[0, 0, 0]));
    }
}
