//! Error types for identity operations.

use weft_store::StoreError;

/// Errors produced by the key store and identity layer.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Malformed identity or key material.
    #[error("invalid identity: {0}")]
    Validation(String),

    /// No signing key is stored for this id.
    #[error("no signing key for {0}")]
    KeyNotFound(String),

    /// A key already exists for this id.
    #[error("key already exists for {0}")]
    AlreadyExists(String),

    /// The identity type has no registered provider.
    #[error("unknown identity provider: {0}")]
    UnknownProvider(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<postcard::Error> for IdentityError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
