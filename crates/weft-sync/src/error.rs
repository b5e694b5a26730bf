//! Error types for sync operations.

use std::time::Duration;

use weft_identity::IdentityError;
use weft_oplog::OplogError;
use weft_types::PeerId;

/// Errors that can occur while exchanging heads with a peer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The dial or the exchange did not finish in time.
    #[error("sync with {peer} timed out after {after:?}")]
    Timeout { peer: PeerId, after: Duration },

    /// The peer has no handler for this log's protocol.
    #[error("peer {peer} does not support {protocol}")]
    UnsupportedProtocol { peer: PeerId, protocol: String },

    /// The peer cannot be reached.
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    /// The stream was closed before the exchange finished.
    #[error("stream closed")]
    StreamClosed,

    /// A frame exceeded the size limit.
    #[error("message of {0} bytes exceeds the limit")]
    MessageTooLarge(usize),

    /// The peer sent a message out of turn.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: &'static str, got: &'static str },

    /// The sync service was stopped.
    #[error("sync stopped")]
    Stopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("oplog error: {0}")]
    Oplog(#[from] OplogError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl From<postcard::Error> for SyncError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
