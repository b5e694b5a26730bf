//! The peer transport interface and length-prefixed message framing.
//!
//! A [`Transport`] offers the three primitives replication needs: dial a
//! stream to a peer on a protocol path, publish/subscribe on a topic, and
//! report peers joining or leaving a topic. Connection setup, encryption and
//! routing are the implementation's business.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use weft_types::PeerId;

use crate::error::SyncError;

/// Maximum frame size: 64 MB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// A bidirectional stream of whole messages.
#[async_trait]
pub trait MessageStream: Send {
    async fn send(&mut self, message: Bytes) -> Result<(), SyncError>;

    /// Next message, or `None` once the other side closed the stream.
    async fn recv(&mut self) -> Result<Option<Bytes>, SyncError>;
}

/// A stream opened by a remote peer on a handled protocol.
pub type IncomingStream = (PeerId, Box<dyn MessageStream>);

/// Topic identifier: blake3 of the log id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId([u8; 32]);

impl TopicId {
    pub fn from_log_id(log_id: &str) -> Self {
        Self(*blake3::hash(log_id.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({self})")
    }
}

/// Something that happened on a subscribed topic.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// A peer published `data`.
    Message { from: PeerId, data: Bytes },
    /// A peer subscribed to the topic.
    PeerSubscribed(PeerId),
    /// A peer unsubscribed from the topic.
    PeerUnsubscribed(PeerId),
}

/// Peer-to-peer transport used by the sync service.
///
/// This allows substituting an in-process network in tests (see
/// [`MemoryNetwork`](crate::MemoryNetwork)).
#[async_trait]
pub trait Transport: Send + Sync {
    /// This endpoint's peer id.
    fn local_peer(&self) -> PeerId;

    /// Open a stream to `peer` on `protocol`.
    ///
    /// Fails with [`SyncError::UnsupportedProtocol`] if the peer does not
    /// handle `protocol`.
    async fn dial(&self, peer: &PeerId, protocol: &str)
    -> Result<Box<dyn MessageStream>, SyncError>;

    /// Deliver streams opened on `protocol` to `incoming`.
    async fn handle(
        &self,
        protocol: &str,
        incoming: mpsc::UnboundedSender<IncomingStream>,
    ) -> Result<(), SyncError>;

    async fn unhandle(&self, protocol: &str);

    /// Join `topic`, receiving messages and membership changes.
    async fn subscribe(
        &self,
        topic: TopicId,
    ) -> Result<mpsc::UnboundedReceiver<TopicEvent>, SyncError>;

    async fn unsubscribe(&self, topic: &TopicId);

    /// Send `data` to every other subscriber of `topic`.
    async fn publish(&self, topic: &TopicId, data: Bytes) -> Result<(), SyncError>;
}

/// [`MessageStream`] over a byte stream.
///
/// Each message is length-prefixed (4-byte big-endian).
pub struct FramedStream<S> {
    io: S,
}

impl<S> FramedStream<S> {
    pub fn new(io: S) -> Self {
        Self { io }
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

#[async_trait]
impl<S> MessageStream for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: Bytes) -> Result<(), SyncError> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(SyncError::MessageTooLarge(message.len()));
        }
        self.io
            .write_all(&(message.len() as u32).to_be_bytes())
            .await?;
        self.io.write_all(&message).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, SyncError> {
        // Read length prefix.
        let mut len_buf = [0u8; 4];
        match self.io.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(SyncError::MessageTooLarge(len));
        }

        let mut buf = vec![0u8; len];
        self.io.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SyncError::StreamClosed
            } else {
                e.into()
            }
        })?;
        Ok(Some(Bytes::from(buf)))
    }
}
