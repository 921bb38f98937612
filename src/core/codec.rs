//! Fixed-width binary wire codec
//!
//! Every on-wire structure is a fixed sequence of fields. Keys, signatures
//! and peer addresses are stored in fixed-width slots, left-padded with
//! zeros so the value occupies the low-order bytes. Integers are 4-byte
//! little-endian.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Field widths
// =============================================================================

/// Width of a key or signature slot on the wire
pub const NETWORK_KEY_SIZE: usize = 80;

/// Width of a SHA-256 hash
pub const HASH_SIZE: usize = 32;

/// Width of an origin-peer tag (`ip:port`, zero padded)
pub const IP_SIZE: usize = 21;

/// Wire decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated input reading {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}

/// Types with a fixed binary wire layout
pub trait WireEncode {
    /// Append the wire form of `self` to `dst`
    fn encode_to(&self, dst: &mut BytesMut);

    /// Encode into a fresh buffer
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf.freeze()
    }
}

/// Types that can be read back from their wire layout
pub trait WireDecode: Sized {
    /// Decode one value from the front of `src` and return the unconsumed tail
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError>;
}

/// Left-pad `value` with zeros to `N` bytes.
///
/// Values longer than `N` keep their first `N` bytes.
pub fn fit_bytes<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    if value.len() >= N {
        out.copy_from_slice(&value[..N]);
    } else {
        out[N - value.len()..].copy_from_slice(value);
    }
    out
}

/// Strip the zero padding from a fixed-width slot
pub fn significant_bytes(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    &value[start..]
}

/// Cursor over a byte slice that reports which field ran out of input
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        self.ensure(field, N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Consume the reader, returning everything not yet read
    pub fn into_rest(self) -> &'a [u8] {
        self.buf
    }
}

// =============================================================================
// Identity value types
// =============================================================================

/// An 80-byte key or signature slot.
///
/// Used for origin/sender/recipient public keys and for signatures, which
/// double as the dedup identity of blocks and transactions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkKey(pub [u8; NETWORK_KEY_SIZE]);

impl NetworkKey {
    pub const ZERO: NetworkKey = NetworkKey([0u8; NETWORK_KEY_SIZE]);

    /// Build a key slot from a value of any length (left-zero-padded)
    pub fn from_slice(value: &[u8]) -> Self {
        Self(fit_bytes(value))
    }

    pub fn as_bytes(&self) -> &[u8; NETWORK_KEY_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Hex of the value without its zero padding
    pub fn to_hex(&self) -> String {
        hex::encode(significant_bytes(&self.0))
    }

    /// Shortened hex form for log lines
    pub fn short_hex(&self) -> String {
        let full = self.to_hex();
        if full.len() > 16 {
            format!("{}…", &full[..16])
        } else {
            full
        }
    }
}

impl Default for NetworkKey {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkKey({})", self.short_hex())
    }
}

impl Serialize for NetworkKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Origin-peer tag: the `ip:port` a message was relayed from.
///
/// Only used to avoid echoing a broadcast back to its sender; never hashed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PeerTag(pub [u8; IP_SIZE]);

impl PeerTag {
    pub fn from_addr(addr: &str) -> Self {
        Self(fit_bytes(addr.as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The tagged address without padding
    pub fn to_addr_string(&self) -> String {
        String::from_utf8_lossy(significant_bytes(&self.0)).into_owned()
    }
}

impl fmt::Display for PeerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "local")
        } else {
            write!(f, "{}", self.to_addr_string())
        }
    }
}

impl fmt::Debug for PeerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerTag({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_bytes_pads_left() {
        let fitted: [u8; 5] = fit_bytes(&[1, 2]);
        assert_eq!(fitted, [0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_fit_bytes_truncates_long_values() {
        let fitted: [u8; 3] = fit_bytes(&[1, 2, 3, 4, 5]);
        assert_eq!(fitted, [1, 2, 3]);
    }

    #[test]
    fn test_reader_reports_truncated_field() {
        let data = [1u8, 2, 3];
        let mut reader = WireReader::new(&data);
        assert_eq!(reader.u8("kind").unwrap(), 1);

        let err = reader.u32_le("timestamp").unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                field: "timestamp",
                needed: 4,
                remaining: 2
            }
        );
    }

    #[test]
    fn test_reader_little_endian() {
        let data = [0x01u8, 0x02, 0x00, 0x00, 0xAA];
        let mut reader = WireReader::new(&data);
        assert_eq!(reader.u32_le("nonce").unwrap(), 0x0201);
        assert_eq!(reader.into_rest(), &[0xAA]);
    }

    #[test]
    fn test_peer_tag_round_trip() {
        let tag = PeerTag::from_addr("10.0.0.7:9200");
        assert_eq!(tag.to_addr_string(), "10.0.0.7:9200");
        assert_eq!(tag.0[0], 0);
        assert!(PeerTag::default().is_empty());
    }

    #[test]
    fn test_network_key_identity() {
        let a = NetworkKey::from_slice(&[7, 8, 9]);
        let b = NetworkKey::from_slice(&[0, 7, 8, 9]);
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), "070809");
        assert!(NetworkKey::ZERO.is_zero());
    }
}
