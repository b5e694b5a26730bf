//! Log manifests.
//!
//! A manifest names a log and its access controller. It is stored as a
//! content-addressed block; its hash is the log's [`Address`].

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_store::Storage;
use weft_types::content_address;

use crate::address::Address;
use crate::error::NodeError;

/// Description of a log, persisted once and addressed by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Address of the access controller guarding the log.
    pub access_controller: String,
    pub meta: Option<String>,
}

/// Reads and writes manifests in a block storage.
pub struct ManifestStore {
    storage: Arc<dyn Storage>,
}

impl ManifestStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist `manifest`, returning the address derived from its hash.
    pub async fn create(&self, manifest: &Manifest) -> Result<Address, NodeError> {
        for (field, value) in [
            ("name", &manifest.name),
            ("type", &manifest.kind),
            ("access_controller", &manifest.access_controller),
        ] {
            if value.is_empty() {
                return Err(NodeError::InvalidManifest(format!("{field} is required")));
            }
        }

        let bytes = postcard::to_allocvec(manifest)?;
        let hash = content_address(&bytes);
        self.storage.put(&hash, Bytes::from(bytes)).await?;
        debug!(%hash, name = %manifest.name, "stored manifest");
        Address::new(hash)
    }

    /// The manifest at `address`, if stored.
    pub async fn get(&self, address: &Address) -> Result<Option<Manifest>, NodeError> {
        match self.storage.get(address.hash()).await? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn close(&self) -> Result<(), NodeError> {
        self.storage.close().await?;
        Ok(())
    }
}
