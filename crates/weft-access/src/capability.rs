//! Capabilities held in a nested, replicated log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use weft_identity::Identities;
use weft_oplog::{AccessController, AppendOptions, Entry, Log, OplogError, Payload};

use crate::error::AccessError;
use crate::{ANY, signer};

/// Operation recorded in the capability log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclOp {
    /// Set the holders of `capability`.
    Put {
        capability: String,
        ids: BTreeSet<String>,
    },
    /// Remove `capability` entirely.
    Del { capability: String },
}

/// Key-value view of the capability log: `capability -> set of identity ids`.
///
/// Writers of the nested log (its own access controller's write set) are
/// implicit admins. An entry may be appended to the governed log if its
/// signer holds `write` or `admin`.
pub struct CapabilityAccessController {
    log: Arc<Log<AclOp>>,
    identities: Arc<Identities>,
    address: String,
}

impl std::fmt::Debug for CapabilityAccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityAccessController")
            .field("address", &self.address)
            .finish()
    }
}

impl CapabilityAccessController {
    pub const KIND: &'static str = "capability";

    /// Controller over `log`. Its address is `/capability/<log id>`, with
    /// the log id's leading slash dropped.
    pub fn new(log: Arc<Log<AclOp>>) -> Self {
        let identities = log.identities().clone();
        let address = format!("/{}/{}", Self::KIND, log.id().trim_start_matches('/'));
        Self {
            log,
            identities,
            address,
        }
    }

    /// The nested log holding the capabilities.
    pub fn log(&self) -> &Arc<Log<AclOp>> {
        &self.log
    }

    /// Add `id` to the holders of `capability`. Returns the recorded entry.
    pub async fn grant(&self, capability: &str, id: &str) -> Result<Entry<AclOp>, AccessError> {
        let mut ids = self.get(capability).await?;
        ids.insert(id.to_string());
        let entry = self
            .log
            .append(
                AclOp::Put {
                    capability: capability.to_string(),
                    ids,
                },
                AppendOptions::default(),
            )
            .await?;
        info!(capability, id, "granted capability");
        Ok(entry)
    }

    /// Remove `id` from the holders of `capability`; the capability is
    /// deleted once nobody holds it. Returns the recorded entry.
    pub async fn revoke(&self, capability: &str, id: &str) -> Result<Entry<AclOp>, AccessError> {
        let mut ids = self.get(capability).await?;
        ids.remove(id);
        let op = if ids.is_empty() {
            AclOp::Del {
                capability: capability.to_string(),
            }
        } else {
            AclOp::Put {
                capability: capability.to_string(),
                ids,
            }
        };
        let entry = self.log.append(op, AppendOptions::default()).await?;
        info!(capability, id, "revoked capability");
        Ok(entry)
    }

    /// Holders of `capability` as recorded in the log.
    pub async fn get(&self, capability: &str) -> Result<BTreeSet<String>, AccessError> {
        Ok(self.recorded().await?.remove(capability).unwrap_or_default())
    }

    /// Every capability, with the nested log's writers added to `admin`.
    pub async fn capabilities(&self) -> Result<BTreeMap<String, BTreeSet<String>>, AccessError> {
        Ok(self.resolved().await?)
    }

    /// Whether `id` holds `capability`, directly or through the wildcard.
    pub async fn has_capability(&self, capability: &str, id: &str) -> Result<bool, AccessError> {
        let capabilities = self.capabilities().await?;
        Ok(capabilities
            .get(capability)
            .is_some_and(|ids| ids.contains(id) || ids.contains(ANY)))
    }

    async fn resolved(&self) -> Result<BTreeMap<String, BTreeSet<String>>, OplogError> {
        let mut capabilities = self.recorded().await?;
        let admins = capabilities.entry("admin".to_string()).or_default();
        admins.extend(self.log.access().write());
        Ok(capabilities)
    }

    // Newest write per capability wins.
    async fn recorded(&self) -> Result<BTreeMap<String, BTreeSet<String>>, OplogError> {
        let mut state = BTreeMap::new();
        let mut deleted = BTreeSet::new();
        let mut traversal = self.log.traverse(None, None, true);
        while let Some(entry) = traversal.next().await? {
            match entry.payload {
                AclOp::Put { capability, ids } => {
                    if !deleted.contains(&capability) {
                        state.entry(capability).or_insert(ids);
                    }
                }
                AclOp::Del { capability } => {
                    if !state.contains_key(&capability) {
                        deleted.insert(capability);
                    }
                }
            }
        }
        Ok(state)
    }

    async fn may_write(&self, id: &str) -> Result<bool, OplogError> {
        let capabilities = self.resolved().await?;
        Ok(["write", "admin"].iter().any(|cap| {
            capabilities
                .get(*cap)
                .is_some_and(|ids| ids.contains(id) || ids.contains(ANY))
        }))
    }
}

#[async_trait]
impl<T: Payload> AccessController<T> for CapabilityAccessController {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn write(&self) -> Vec<String> {
        self.log.access().write()
    }

    async fn can_append(&self, entry: &Entry<T>) -> Result<bool, OplogError> {
        let Some(identity) = signer(&self.identities, entry).await? else {
            return Ok(false);
        };
        if !self.may_write(&identity.id).await? {
            return Ok(false);
        }
        Ok(self.identities.verify_identity(&identity).await)
    }

    async fn close(&self) -> Result<(), OplogError> {
        self.log.close().await
    }
}
