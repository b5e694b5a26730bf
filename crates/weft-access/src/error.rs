//! Error types for access controllers.

use weft_identity::IdentityError;
use weft_oplog::OplogError;
use weft_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Not an address of this controller type.
    #[error("invalid access controller address: {0}")]
    InvalidAddress(String),

    /// No manifest stored under the address.
    #[error("access controller manifest not found: {0}")]
    ManifestNotFound(String),

    /// The manifest decoded but describes another controller.
    #[error("unexpected access controller type {found}, expected {expected}")]
    WrongType { expected: String, found: String },

    #[error("oplog error: {0}")]
    Oplog(#[from] OplogError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for AccessError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
