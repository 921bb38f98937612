//! ECDSA key management for the blockchain
//!
//! Provides key pair generation, signing, and verification on the NIST
//! P-224 curve. Public keys travel as the two affine coordinates and
//! signatures as the `(r, s)` scalar pair, each half 28 bytes wide,
//! right-justified in an 80-byte [`NetworkKey`] slot.

use p224::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p224::ecdsa::{Signature, SigningKey, VerifyingKey};
use p224::{EncodedPoint, FieldBytes};
use rand::rngs::OsRng;
use thiserror::Error;

use super::hash::Hash;
use crate::core::codec::NetworkKey;

/// Width of one curve field element (224 bits)
pub const FIELD_SIZE: usize = 28;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Signing failed")]
    SigningFailed,
}

/// The node's signing identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: NetworkKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Create a key pair from the raw 28-byte private scalar
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        Self::from_private_key_bytes(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        // Uncompressed SEC1: 0x04 || x || y
        let coordinates = &point.as_bytes()[1..];
        let public_key = join_pair(&coordinates[..FIELD_SIZE], &coordinates[FIELD_SIZE..]);
        Self {
            signing_key,
            public_key,
        }
    }

    /// The public key as it appears on the wire
    pub fn public_key(&self) -> &NetworkKey {
        &self.public_key
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign a 32-byte hash with the private key
    pub fn sign(&self, hash: &Hash) -> Result<NetworkKey, KeyError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(hash)
            .map_err(|_| KeyError::SigningFailed)?;
        let (r, s) = signature.split_bytes();
        Ok(join_pair(&r, &s))
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, hash: &Hash, signature: &NetworkKey) -> bool {
        verify_signature(&self.public_key, signature, hash)
    }
}

/// Split an 80-byte slot into its two right-justified 28-byte halves
pub fn split_pair(slot: &NetworkKey) -> (FieldBytes, FieldBytes) {
    let bytes = slot.as_bytes();
    let tail = &bytes[bytes.len() - 2 * FIELD_SIZE..];
    (
        FieldBytes::clone_from_slice(&tail[..FIELD_SIZE]),
        FieldBytes::clone_from_slice(&tail[FIELD_SIZE..]),
    )
}

/// Join two field elements into an 80-byte slot
pub fn join_pair(first: &[u8], second: &[u8]) -> NetworkKey {
    let mut joined = [0u8; 2 * FIELD_SIZE];
    joined[..FIELD_SIZE].copy_from_slice(&crate::core::codec::fit_bytes::<FIELD_SIZE>(first));
    joined[FIELD_SIZE..].copy_from_slice(&crate::core::codec::fit_bytes::<FIELD_SIZE>(second));
    NetworkKey::from_slice(&joined)
}

/// Parse a wire public key into a verifying key
pub fn verifying_key(public_key: &NetworkKey) -> Result<VerifyingKey, KeyError> {
    let (x, y) = split_pair(public_key);
    let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
    VerifyingKey::from_encoded_point(&point).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify `signature` over `hash` against `public_key`.
///
/// Malformed keys or signatures simply fail verification.
pub fn verify_signature(public_key: &NetworkKey, signature: &NetworkKey, hash: &Hash) -> bool {
    let key = match verifying_key(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let (r, s) = split_pair(signature);
    let signature = match Signature::from_scalars(r, s) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    key.verify_prehash(hash, &signature).is_ok()
}
