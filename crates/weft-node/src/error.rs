//! Error types for the node.

/// Errors that can occur while opening or operating replicas.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Not a `/weft/<hash>` address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No manifest is stored for the address.
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// A manifest is missing a required field.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The manifest names an access controller this node cannot build.
    #[error("unsupported access controller: {0}")]
    UnsupportedAccessController(String),

    /// The replica was closed.
    #[error("replica {0} is closed")]
    Closed(String),

    /// The node was stopped.
    #[error("node stopped")]
    Stopped,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(#[from] weft_store::StoreError),

    #[error("identity error: {0}")]
    Identity(#[from] weft_identity::IdentityError),

    #[error("oplog error: {0}")]
    Oplog(#[from] weft_oplog::OplogError),

    #[error("access error: {0}")]
    Access(#[from] weft_access::AccessError),

    #[error("sync error: {0}")]
    Sync(#[from] weft_sync::SyncError),
}

impl From<postcard::Error> for NodeError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
