//! TCP server and connection handling
//!
//! Accepts incoming peer connections, dials outbound ones, and runs the
//! per-connection reader and writer tasks.

use crate::core::codec::WireDecode;
use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerHandle};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;

/// Largest frame accepted in length-prefixed mode
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of one read in legacy mode
pub const LEGACY_READ_SIZE: usize = 1_000_000;

/// Frames a peer's write queue can hold before frames are dropped
pub const PEER_QUEUE_SIZE: usize = 64;

/// How messages are delimited on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Each frame is preceded by its length as a little-endian u32
    #[default]
    LengthPrefixed,
    /// Whatever a single read returns is one message; no delimiter
    Legacy,
}

/// Splits a byte stream into message frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    mode: FrameMode,
}

impl FrameCodec {
    pub fn new(mode: FrameMode) -> Self {
        Self { mode }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            FrameMode::Legacy => {
                if src.is_empty() {
                    return Ok(None);
                }
                let len = src.len().min(LEGACY_READ_SIZE);
                Ok(Some(src.split_to(len)))
            }
            FrameMode::LengthPrefixed => {
                if src.len() < 4 {
                    return Ok(None);
                }

                let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if len > MAX_FRAME_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Frame of {} bytes exceeds limit", len),
                    ));
                }

                if src.len() < 4 + len {
                    src.reserve(4 + len - src.len());
                    return Ok(None);
                }

                src.advance(4);
                Ok(Some(src.split_to(len)))
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.mode {
            FrameMode::Legacy => dst.put_slice(&item),
            FrameMode::LengthPrefixed => {
                if item.len() > MAX_FRAME_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("Frame of {} bytes exceeds limit", item.len()),
                    ));
                }
                dst.reserve(4 + item.len());
                dst.put_u32_le(item.len() as u32);
                dst.put_slice(&item);
            }
        }
        Ok(())
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer.
///
/// Without `retry` the first timeout or connection error is final. With it
/// the dial repeats until it succeeds.
pub async fn connect_to_peer(
    addr: &str,
    timeout: Duration,
    retry: bool,
) -> Result<TcpStream, PeerError> {
    loop {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) if !retry => {
                return Err(PeerError::ConnectionFailed(format!("{}: {}", addr, e)))
            }
            Err(_) if !retry => return Err(PeerError::Timeout(addr.to_string())),
            Ok(Err(e)) => {
                debug!("Dial to {} failed ({}), retrying", addr, e);
                tokio::time::sleep(timeout).await;
            }
            Err(_) => debug!("Dial to {} timed out, retrying", addr),
        }
    }
}

/// Sent by a connection's reader task once the connection is finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerClosed {
    pub addr: String,
    pub conn_id: u64,
}

/// Start the reader and writer tasks for one connection.
///
/// Decoded messages go to `inbound`; malformed frames are logged and
/// dropped. When the stream ends or either side fails, `closed` is told
/// which connection went away.
pub fn spawn_peer_io<S>(
    io: S,
    addr: String,
    conn_id: u64,
    mode: FrameMode,
    inbound: mpsc::Sender<Message>,
    closed: mpsc::Sender<PeerClosed>,
) -> PeerHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let framed = Framed::with_capacity(io, FrameCodec::new(mode), LEGACY_READ_SIZE);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Bytes>(PEER_QUEUE_SIZE);
    let handle = PeerHandle::new(addr.clone(), conn_id, tx);
    let done = CancellationToken::new();

    // Spawn writer task
    let writer_done = done.clone();
    let writer_addr = addr.clone();
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = writer_done.cancelled() => break,
                frame = rx.recv() => frame,
            };
            let Some(frame) = frame else { break };

            if let Err(e) = writer.send(frame).await {
                warn!("Error writing to {}: {}", writer_addr, e);
                writer_done.cancel();
                break;
            }
        }
    });

    // Read messages
    let activity = handle.last_seen.clone();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = done.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    activity.touch();
                    match Message::decode(&frame) {
                        Ok((msg, _)) => {
                            debug!("Received {} from {}", msg.type_name(), addr);
                            if inbound.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed message from {}: {}", addr, e),
                    }
                }
                Some(Err(e)) => {
                    warn!("Error reading from {}: {}", addr, e);
                    break;
                }
                None => {
                    info!("Peer {} disconnected", addr);
                    break;
                }
            }
        }

        done.cancel();
        let _ = closed.send(PeerClosed { addr, conn_id }).await;
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerTag;
    use crate::network::message::MessageKind;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    #[test]
    fn test_length_prefixed_round_trip() {
        let mut codec = FrameCodec::new(FrameMode::LengthPrefixed);
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

        assert_eq!(&buf[..4], &5u32.to_le_bytes());
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec::new(FrameMode::LengthPrefixed);
        let mut buf = BytesMut::new();
        buf.put_u32_le(10);
        buf.put_slice(b"abc");

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(b"defghij");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abcdefghij");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(FrameMode::LengthPrefixed);
        let mut buf = BytesMut::new();
        buf.put_u32_le((MAX_FRAME_SIZE + 1) as u32);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_legacy_yields_whatever_was_read() {
        let mut codec = FrameCodec::new(FrameMode::Legacy);
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"one"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"two"), &mut buf).unwrap();

        // Two writes that arrive together read back as one message
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"onetwo");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&FrameMode::LengthPrefixed).unwrap(),
            "\"length_prefixed\""
        );
        let mode: FrameMode = serde_json::from_str("\"legacy\"").unwrap();
        assert_eq!(mode, FrameMode::Legacy);
    }

    #[tokio::test]
    async fn test_peer_io_forwards_messages_and_survives_garbage() {
        let (local, remote) = tokio::io::duplex(4096);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let (closed_tx, mut closed_rx) = mpsc::channel(1);

        let handle = spawn_peer_io(
            local,
            "10.0.0.2:9200".to_string(),
            7,
            FrameMode::LengthPrefixed,
            inbound_tx,
            closed_tx,
        );

        let mut remote = Framed::new(remote, FrameCodec::new(FrameMode::LengthPrefixed));
        let connected_at = handle.last_seen.get();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A frame too short to be a message is dropped
        remote.send(Bytes::from_static(&[23u8; 5])).await.unwrap();

        let msg = Message::new(MessageKind::GetNodes, Bytes::from_static(b"hi"))
            .with_origin(PeerTag::from_addr("10.0.0.2:9200"));
        remote.send(msg.to_bytes()).await.unwrap();

        let received = timeout(Duration::from_secs(5), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, msg);
        assert!(handle.last_seen.get() > connected_at);

        // Outbound frames reach the remote side
        handle.try_send(Bytes::from_static(b"reply")).unwrap();
        let frame = timeout(Duration::from_secs(5), remote.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"reply");

        // Closing the remote side reports the connection as gone
        remote.get_mut().shutdown().await.unwrap();
        drop(remote);
        let closed = timeout(Duration::from_secs(5), closed_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            closed,
            PeerClosed {
                addr: "10.0.0.2:9200".to_string(),
                conn_id: 7
            }
        );
    }

    #[tokio::test]
    async fn test_connect_without_retry_fails_fast() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_to_peer(&addr, Duration::from_secs(1), false).await;
        assert!(result.is_err());
    }
}
