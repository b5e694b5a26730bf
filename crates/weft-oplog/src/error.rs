//! Error types for the oplog crate.

use weft_identity::IdentityError;
use weft_store::StoreError;

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum OplogError {
    /// Malformed entry, missing field or log id mismatch.
    #[error("invalid entry: {0}")]
    Validation(String),

    /// Entry signature does not verify.
    #[error("invalid signature: {0}")]
    Signature(String),

    /// The access controller denied the append.
    #[error("not allowed to write to log: {0}")]
    Authorization(String),

    /// Referenced entries are neither indexed nor retrievable.
    #[error("entries not found: {0:?}")]
    NotFound(Vec<String>),

    /// A custom tie-breaker reported two distinct entries as equal.
    #[error("tie-breaker returned equal for distinct entries {0} and {1}")]
    AmbiguousOrder(String, String),

    /// Identity layer failure.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for OplogError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
