//! Messages of the head-exchange stream protocol.
//!
//! The broadcast topic carries bare signed entry bytes; only the direct
//! stream uses [`SyncMessage`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One frame of a sync session.
///
/// A session is: `Heads` each way, then each side sends a `Pull` naming the
/// heads it lacks and answers the other's `Pull` with one or more `Entries`
/// frames, the last one carrying `more: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Signed bytes of the sender's heads, plus the identities that signed them.
    Heads {
        heads: Vec<Vec<u8>>,
        identities: Vec<Vec<u8>>,
    },

    /// Request for the ancestors of `want` the sender lacks, given it holds `have`.
    Pull { want: Vec<String>, have: Vec<String> },

    /// Entries answering a [`SyncMessage::Pull`], parents first, plus the
    /// identities of signers not sent in an earlier frame. `more` is set on
    /// every frame but the last.
    Entries {
        entries: Vec<Vec<u8>>,
        identities: Vec<Vec<u8>>,
        more: bool,
    },
}

impl SyncMessage {
    pub fn encode(&self) -> Result<Bytes, SyncError> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Variant name, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heads { .. } => "heads",
            Self::Pull { .. } => "pull",
            Self::Entries { .. } => "entries",
        }
    }
}
