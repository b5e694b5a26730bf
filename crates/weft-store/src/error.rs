//! Error types for storage operations.

use std::time::Duration;

/// Errors that can occur in a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key was not found where presence was required.
    #[error("key not found: {0}")]
    NotFound(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk keyspace reported an error.
    #[error("disk store error: {0}")]
    Disk(#[from] fjall::Error),

    /// A bounded operation did not finish in time.
    #[error("{op} of {key} timed out after {after:?}")]
    Timeout {
        /// Operation name (`put`, `get`, ...).
        op: &'static str,
        /// Key being accessed.
        key: String,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// The key cannot be used with this backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The backend was closed.
    #[error("storage closed")]
    Closed,
}
