//! Network message types for P2P communication
//!
//! Every frame carries one message: a one-byte kind, the origin-peer tag,
//! four option bytes and the kind-specific payload.

use crate::core::codec::{
    fit_bytes, CodecError, PeerTag, WireDecode, WireEncode, WireReader, IP_SIZE,
};
use crate::core::{Block, Transaction};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed message header (kind, origin tag, options)
pub const MESSAGE_HEADER_SIZE: usize = 1 + IP_SIZE + 4;

/// Minimum number of bytes a frame needs to be a message at all
pub const MIN_MESSAGE_SIZE: usize = 1 + IP_SIZE;

/// Network message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    GetNodes = 20,
    SendNodes = 21,
    GetTransaction = 22,
    SendTransaction = 23,
    GetBlock = 24,
    SendBlock = 25,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(Self::GetNodes),
            21 => Ok(Self::SendNodes),
            22 => Ok(Self::GetTransaction),
            23 => Ok(Self::SendTransaction),
            24 => Ok(Self::GetBlock),
            25 => Ok(Self::SendBlock),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl MessageKind {
    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GetNodes => "GetNodes",
            Self::SendNodes => "SendNodes",
            Self::GetTransaction => "GetTransaction",
            Self::SendTransaction => "SendTransaction",
            Self::GetBlock => "GetBlock",
            Self::SendBlock => "SendBlock",
        }
    }
}

/// A framed network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Peer the message came from; rewritten on every relay hop
    pub origin: PeerTag,
    /// Reserved, always zero
    pub options: [u8; 4],
    pub data: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, data: Bytes) -> Self {
        Self {
            kind,
            origin: PeerTag::default(),
            options: [0; 4],
            data,
        }
    }

    /// Announce a transaction; the origin is the peer it came from
    pub fn send_transaction(tx: &Transaction) -> Self {
        Self::new(MessageKind::SendTransaction, tx.encode()).with_origin(tx.origin)
    }

    /// Announce a block; the origin is the peer it came from
    pub fn send_block(block: &Block) -> Self {
        Self::new(MessageKind::SendBlock, block.encode()).with_origin(block.origin)
    }

    pub fn with_origin(mut self, origin: PeerTag) -> Self {
        self.origin = origin;
        self
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Bytes {
        self.encode()
    }

    /// Deserialize message from a complete frame
    pub fn from_bytes(frame: &[u8]) -> Result<Self, CodecError> {
        Self::decode(frame).map(|(message, _)| message)
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

impl WireEncode for Message {
    fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(MESSAGE_HEADER_SIZE + self.data.len());
        dst.put_u8(self.kind as u8);
        dst.put_slice(&self.origin.0);
        dst.put_slice(&self.options);
        dst.put_slice(&self.data);
    }
}

impl WireDecode for Message {
    fn decode(src: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        if src.len() < MIN_MESSAGE_SIZE {
            return Err(CodecError::Truncated {
                field: "message header",
                needed: MIN_MESSAGE_SIZE,
                remaining: src.len(),
            });
        }

        let mut reader = WireReader::new(src);
        let kind = MessageKind::try_from(reader.u8("message kind")?)?;
        let origin = PeerTag(reader.array("message origin")?);
        // Frames may stop short of the option bytes; missing ones read as zero
        let options_len = reader.remaining().min(4);
        let options = fit_bytes(reader.bytes("message options", options_len)?);
        let data = Bytes::copy_from_slice(reader.into_rest());

        let message = Self {
            kind,
            origin,
            options,
            data,
        };
        Ok((message, &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::tests::signed_tx;
    use crate::crypto::KeyPair;

    #[test]
    fn test_message_layout() {
        let msg = Message::new(MessageKind::GetNodes, Bytes::from_static(b"xyz"))
            .with_origin(PeerTag::from_addr("10.0.0.1:9200"));
        let bytes = msg.to_bytes();

        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 3);
        assert_eq!(bytes[0], 20);
        assert_eq!(&bytes[1..1 + IP_SIZE], &msg.origin.0);
        assert_eq!(&bytes[MESSAGE_HEADER_SIZE..], b"xyz");
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_send_transaction_carries_origin() {
        let kp = KeyPair::generate();
        let mut tx = signed_tx(&kp, "hello");
        tx.origin = PeerTag::from_addr("10.0.0.9:9200");

        let msg = Message::from_bytes(&Message::send_transaction(&tx).to_bytes()).unwrap();
        assert_eq!(msg.kind, MessageKind::SendTransaction);
        assert_eq!(msg.origin, tx.origin);

        let (decoded, _) = Transaction::decode(&msg.data).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_short_frame_is_decode_error() {
        let frame = [23u8; MIN_MESSAGE_SIZE - 1];
        assert!(matches!(
            Message::from_bytes(&frame),
            Err(CodecError::Truncated { field: "message header", .. })
        ));
        assert!(Message::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_minimum_frame_decodes() {
        let mut frame = vec![0u8; MIN_MESSAGE_SIZE];
        frame[0] = 24;
        let msg = Message::from_bytes(&frame).unwrap();

        assert_eq!(msg.kind, MessageKind::GetBlock);
        assert!(msg.origin.is_empty());
        assert_eq!(msg.options, [0; 4]);
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut frame = vec![0u8; MESSAGE_HEADER_SIZE];
        frame[0] = 99;
        assert_eq!(
            Message::from_bytes(&frame),
            Err(CodecError::UnknownMessageType(99))
        );
    }

    #[test]
    fn test_kind_ids() {
        for id in 20..=25u8 {
            assert_eq!(MessageKind::try_from(id).unwrap() as u8, id);
        }
        assert!(MessageKind::try_from(19).is_err());
    }
}
