//! Append-authorization interface.

use async_trait::async_trait;

use crate::entry::{Entry, Payload};
use crate::error::OplogError;

/// Decides whether a signed entry may be appended to or merged into a log.
///
/// Called for local appends and for every remote entry before it is
/// indexed.
#[async_trait]
pub trait AccessController<T: Payload>: Send + Sync {
    /// Controller type name, as recorded in manifests.
    fn kind(&self) -> &str;

    /// Address of the controller's manifest, empty if it has none.
    fn address(&self) -> &str {
        ""
    }

    /// Identity ids allowed to write.
    fn write(&self) -> Vec<String> {
        Vec::new()
    }

    async fn can_append(&self, entry: &Entry<T>) -> Result<bool, OplogError>;

    async fn close(&self) -> Result<(), OplogError> {
        Ok(())
    }
}

/// Accepts every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl<T: Payload> AccessController<T> for AllowAll {
    fn kind(&self) -> &str {
        "allowall"
    }

    fn write(&self) -> Vec<String> {
        vec!["*".to_string()]
    }

    async fn can_append(&self, _entry: &Entry<T>) -> Result<bool, OplogError> {
        Ok(true)
    }
}
