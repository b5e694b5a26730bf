//! Shared types for weft.
//!
//! This crate defines the leaf types every other weft crate builds on:
//! the Lamport [`Clock`] and its total order ([`compare_clocks`]),
//! content addressing ([`content_address`]), peer identifiers ([`PeerId`]),
//! the typed [`events::EventBus`], and the protocol constants shared by
//! storage, sync and addressing.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod content;
pub mod events;

pub use clock::{Clock, compare_clocks};
pub use content::{content_address, content_id, is_content_address, parse_content_address};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Version stamped into every entry created by this implementation.
pub const ENTRY_VERSION: u32 = 2;

/// Default skip-list fan-out for `refs` on append.
pub const DEFAULT_REFERENCES_COUNT: usize = 16;

/// Default capacity of the LRU front layer in composed stores and of the
/// verified-identity cache.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Default capacity of a standalone LRU store.
pub const DEFAULT_LRU_SIZE: usize = 1_000_000;

/// Default bound on a single block-store operation.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a sync dial + head exchange.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Protocol segment of log addresses (`/weft/<manifest hash>`).
pub const ADDRESS_PROTOCOL: &str = "weft";

/// Stream protocol prefix for the head exchange.
pub const SYNC_PROTOCOL_PREFIX: &str = "/weft/heads";

/// Stream protocol path for the head exchange of `log_id`.
pub fn sync_protocol(log_id: &str) -> String {
    format!("{SYNC_PROTOCOL_PREFIX}{log_id}")
}

// ---------------------------------------------------------------------------
// Peer identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier of a remote peer, as reported by the transport.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
