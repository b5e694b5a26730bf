//! Fixed allow-list of writers.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_identity::Identities;
use weft_oplog::{AccessController, Entry, OplogError, Payload};
use weft_store::Storage;
use weft_types::content_address;

use crate::error::AccessError;
use crate::{ANY, signer};

#[derive(Debug, Serialize, Deserialize)]
struct AllowListManifest {
    #[serde(rename = "type")]
    kind: String,
    write: Vec<String>,
}

/// Admits entries signed by one of a fixed set of identity ids.
///
/// The set is persisted as a content-addressed manifest; the controller's
/// address is `/allowlist/<manifest hash>`.
pub struct AllowListAccessController {
    identities: Arc<Identities>,
    address: String,
    write: Vec<String>,
}

impl std::fmt::Debug for AllowListAccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowListAccessController")
            .field("address", &self.address)
            .field("write", &self.write)
            .finish()
    }
}

impl AllowListAccessController {
    pub const KIND: &'static str = "allowlist";

    /// Persist a manifest for `write` and return its controller.
    pub async fn create(
        identities: Arc<Identities>,
        storage: &dyn Storage,
        write: Vec<String>,
    ) -> Result<Self, AccessError> {
        let manifest = AllowListManifest {
            kind: Self::KIND.to_string(),
            write,
        };
        let bytes = postcard::to_allocvec(&manifest)?;
        let hash = content_address(&bytes);
        storage.put(&hash, Bytes::from(bytes)).await?;

        let address = format!("/{}/{hash}", Self::KIND);
        debug!(%address, writers = manifest.write.len(), "created allow-list");
        Ok(Self {
            identities,
            address,
            write: manifest.write,
        })
    }

    /// Load the controller whose manifest is stored under `address`.
    pub async fn load(
        identities: Arc<Identities>,
        storage: &dyn Storage,
        address: &str,
    ) -> Result<Self, AccessError> {
        let hash = address
            .strip_prefix('/')
            .and_then(|rest| rest.strip_prefix(Self::KIND))
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|hash| weft_types::is_content_address(hash))
            .ok_or_else(|| AccessError::InvalidAddress(address.to_string()))?;

        let bytes = storage
            .get(hash)
            .await?
            .ok_or_else(|| AccessError::ManifestNotFound(address.to_string()))?;
        let manifest: AllowListManifest = postcard::from_bytes(&bytes)?;
        if manifest.kind != Self::KIND {
            return Err(AccessError::WrongType {
                expected: Self::KIND.to_string(),
                found: manifest.kind,
            });
        }

        Ok(Self {
            identities,
            address: address.to_string(),
            write: manifest.write,
        })
    }

    /// Whether `id` is on the list, directly or through the wildcard.
    pub fn allows(&self, id: &str) -> bool {
        self.write.iter().any(|w| w == ANY || w == id)
    }
}

#[async_trait]
impl<T: Payload> AccessController<T> for AllowListAccessController {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn write(&self) -> Vec<String> {
        self.write.clone()
    }

    async fn can_append(&self, entry: &Entry<T>) -> Result<bool, OplogError> {
        let Some(identity) = signer(&self.identities, entry).await? else {
            return Ok(false);
        };
        if !self.allows(&identity.id) {
            return Ok(false);
        }
        Ok(self.identities.verify_identity(&identity).await)
    }
}
