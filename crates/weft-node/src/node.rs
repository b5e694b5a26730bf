//! [`Node`]: opens logs by name or address and owns their replicas.
//!
//! Opening a name creates the log's access controller and manifest, and the
//! log's address is derived from the manifest hash. Opening an address
//! loads the stored manifest and rebuilds the same access controller, so
//! every node opening that address guards the log identically.
//!
//! Storage layout under the configured directory:
//!
//! ```text
//! keystore/                 signing keys
//! identities/               identity records
//! blocks/, pins/            manifests and access-controller manifests
//! logs/<hash>/entries/      entry blocks of one log
//! logs/<hash>/heads/        its heads
//! logs/<hash>/index/        its index
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use weft_access::{AclOp, AllowListAccessController, CapabilityAccessController};
use weft_identity::{Identities, Identity, KeyStore};
use weft_oplog::{AccessController, Log, LogOptions, Payload};
use weft_store::{BlockStorage, ComposedStorage, DiskStorage, LruStorage, MemoryStorage, Storage};
use weft_sync::{LogSync, SyncOptions, Transport};
use weft_types::PeerId;
use weft_types::events::EventBus;

use crate::address::Address;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::manifest::{Manifest, ManifestStore};
use crate::replica::{Guard, OpenReplica, Replica};

/// Log type recorded in manifests when none is given.
pub const DEFAULT_LOG_TYPE: &str = "events";

/// Access controller to create when opening a log by name.
#[derive(Debug, Clone)]
pub enum AccessControllerType {
    /// A fixed set of writer identity ids. Empty means only this node.
    AllowList { write: Vec<String> },
    /// Capabilities in a nested log whose writers are the admins. Empty
    /// means only this node.
    Capability { write: Vec<String> },
}

impl Default for AccessControllerType {
    fn default() -> Self {
        Self::AllowList { write: Vec::new() }
    }
}

/// Options for [`Node::open`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Log type recorded in a new manifest.
    pub kind: Option<String>,
    /// Free-form metadata recorded in a new manifest.
    pub meta: Option<String>,
    /// Access controller for a new log. Ignored when opening an address.
    pub access: AccessControllerType,
    /// Override the configured `sync.enabled`.
    pub sync: Option<bool>,
    /// Override the configured `log.references_count`.
    pub references_count: Option<usize>,
    /// Event bus for the replica, so callers can subscribe before sync
    /// starts.
    pub events: Option<EventBus>,
}

/// Collaborators a node can share with others, mostly for tests.
#[derive(Default)]
pub struct NodeOptions {
    /// Peer transport. Without one, logs are not replicated.
    pub transport: Option<Arc<dyn Transport>>,
    /// Block storage for manifests. Nodes sharing it can open each other's
    /// addresses without fetching manifests.
    pub blocks: Option<Arc<dyn Storage>>,
    pub identities: Option<Arc<Identities>>,
}

/// A weft node: one writer identity, a manifest store and the open
/// replicas.
pub struct Node {
    config: NodeConfig,
    identities: Arc<Identities>,
    identity: Identity,
    transport: Option<Arc<dyn Transport>>,
    blocks: Arc<dyn Storage>,
    manifests: ManifestStore,
    replicas: tokio::sync::Mutex<HashMap<String, Arc<dyn OpenReplica>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity.id)
            .field("in_memory", &self.config.node.in_memory)
            .finish()
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Node {
    /// Start a node with no transport.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::with_options(config, NodeOptions::default()).await
    }

    /// Start a node.
    pub async fn with_options(config: NodeConfig, options: NodeOptions) -> Result<Self, NodeError> {
        let in_memory = config.node.in_memory;
        let directory = config.node.directory.clone();
        if !in_memory {
            std::fs::create_dir_all(&directory)?;
        }

        let identities = match options.identities {
            Some(identities) => identities,
            None if in_memory => Arc::new(
                Identities::in_memory().with_cache_size(config.log.identity_cache_size),
            ),
            None => Arc::new(
                Identities::new(
                    Arc::new(KeyStore::open(directory.join("keystore"))?),
                    Arc::new(DiskStorage::open(directory.join("identities"))?),
                )
                .with_cache_size(config.log.identity_cache_size),
            ),
        };

        let name = if config.node.id.is_empty() {
            hex::encode(rand::random::<[u8; 8]>())
        } else {
            config.node.id.clone()
        };
        let identity = identities.create_identity(&name).await?;

        let blocks: Arc<dyn Storage> = match options.blocks {
            Some(blocks) => blocks,
            None if in_memory => Arc::new(MemoryStorage::new()),
            None => Arc::new(BlockStorage::open(&directory)?.timeout(config.block_timeout())),
        };
        let manifests = ManifestStore::new(Arc::new(ComposedStorage::new(
            Arc::new(LruStorage::new(config.log.cache_size)),
            blocks.clone(),
        )));

        info!(
            identity = %identity.id,
            in_memory,
            syncing = options.transport.is_some() && config.sync.enabled,
            "node started"
        );
        Ok(Self {
            config,
            identities,
            identity,
            transport: options.transport,
            blocks,
            manifests,
            replicas: tokio::sync::Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// This node's writer identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn identities(&self) -> &Arc<Identities> {
        &self.identities
    }

    /// This node's peer id on the transport, if it has one.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.transport.as_ref().map(|t| t.local_peer())
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Open the log named or addressed by `name_or_address`.
    ///
    /// A log already open on this node is returned as is.
    pub async fn open<T: Payload>(
        &self,
        name_or_address: &str,
        options: OpenOptions,
    ) -> Result<Arc<Replica<T>>, NodeError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::Stopped);
        }

        let (address, manifest, guard) = if Address::is_valid(name_or_address) {
            let address = Address::parse(name_or_address)?;
            if let Some(replica) = self.cached::<T>(&address).await? {
                return Ok(replica);
            }
            let manifest = self
                .manifests
                .get(&address)
                .await?
                .ok_or_else(|| NodeError::ManifestNotFound(address.to_string()))?;
            let guard = self.load_access::<T>(&manifest.access_controller).await?;
            (address, manifest, guard)
        } else {
            let guard = self.create_access::<T>(name_or_address, &options.access).await?;
            let manifest = Manifest {
                name: name_or_address.to_string(),
                kind: options
                    .kind
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOG_TYPE.to_string()),
                access_controller: guard.controller().address().to_string(),
                meta: options.meta.clone(),
            };
            let address = self.manifests.create(&manifest).await?;
            if let Some(replica) = self.cached::<T>(&address).await? {
                return Ok(replica);
            }
            (address, manifest, guard)
        };

        let replica = Arc::new(self.start_replica(address, manifest, guard, options).await?);
        self.replicas
            .lock()
            .await
            .insert(replica.address().to_string(), replica.clone());
        Ok(replica)
    }

    /// Close every open replica and the node's stores.
    pub async fn stop(&self) -> Result<(), NodeError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let replicas: Vec<_> = self.replicas.lock().await.drain().collect();
        for (address, replica) in replicas {
            if let Err(e) = replica.close().await {
                warn!(%address, error = %e, "failed to close replica");
            }
        }
        self.manifests.close().await?;
        self.identities.close().await?;
        info!(identity = %self.identity.id, "node stopped");
        Ok(())
    }

    /// The open replica at `address`, if any. Closed replicas are
    /// forgotten.
    async fn cached<T: Payload>(
        &self,
        address: &Address,
    ) -> Result<Option<Arc<Replica<T>>>, NodeError> {
        let mut replicas = self.replicas.lock().await;
        let key = address.to_string();
        let Some(open) = replicas.get(&key) else {
            return Ok(None);
        };
        if open.is_closed() {
            replicas.remove(&key);
            return Ok(None);
        }
        open.clone()
            .into_any()
            .downcast::<Replica<T>>()
            .map(Some)
            .map_err(|_| {
                NodeError::InvalidManifest(format!("{key} is open with another payload type"))
            })
    }

    async fn start_replica<T: Payload>(
        &self,
        address: Address,
        manifest: Manifest,
        guard: Guard<T>,
        options: OpenOptions,
    ) -> Result<Replica<T>, NodeError> {
        let (entry_storage, heads_storage, index_storage) = self.log_storages(&address)?;
        let log = Arc::new(
            Log::open(
                self.identities.clone(),
                self.identity.clone(),
                LogOptions {
                    log_id: Some(address.to_string()),
                    access: Some(guard.controller()),
                    entry_storage: Some(entry_storage),
                    heads_storage: Some(heads_storage),
                    index_storage: Some(index_storage),
                    ..Default::default()
                },
            )
            .await?,
        );

        let events = options.events.unwrap_or_default();
        let sync = match &self.transport {
            Some(transport) if options.sync.unwrap_or(self.config.sync.enabled) => Some(
                LogSync::start(
                    log.clone(),
                    transport.clone(),
                    events.clone(),
                    SyncOptions {
                        timeout: self.config.sync_timeout(),
                        max_peers: self.config.sync.max_peers,
                        ..Default::default()
                    },
                )
                .await?,
            ),
            _ => None,
        };

        info!(%address, name = %manifest.name, syncing = sync.is_some(), "replica opened");
        Ok(Replica::new(
            address,
            manifest,
            log,
            sync,
            events,
            guard,
            options
                .references_count
                .unwrap_or(self.config.log.references_count),
        ))
    }

    /// Entry, heads and index storages of one log, each behind an LRU.
    fn log_storages(
        &self,
        address: &Address,
    ) -> Result<(Arc<dyn Storage>, Arc<dyn Storage>, Arc<dyn Storage>), NodeError> {
        let cache_size = self.config.log.cache_size;
        let cached = |backing: Arc<dyn Storage>| -> Arc<dyn Storage> {
            Arc::new(ComposedStorage::new(
                Arc::new(LruStorage::new(cache_size)),
                backing,
            ))
        };
        if self.config.node.in_memory {
            return Ok((
                cached(Arc::new(MemoryStorage::new())),
                cached(Arc::new(MemoryStorage::new())),
                cached(Arc::new(MemoryStorage::new())),
            ));
        }

        let path = self.log_directory(address);
        let entries = BlockStorage::open(path.join("entries"))?.timeout(self.config.block_timeout());
        Ok((
            cached(Arc::new(entries)),
            cached(Arc::new(DiskStorage::open(path.join("heads"))?)),
            cached(Arc::new(DiskStorage::open(path.join("index"))?)),
        ))
    }

    fn log_directory(&self, address: &Address) -> PathBuf {
        self.config.node.directory.join("logs").join(address.hash())
    }

    async fn create_access<T: Payload>(
        &self,
        name: &str,
        access: &AccessControllerType,
    ) -> Result<Guard<T>, NodeError> {
        match access {
            AccessControllerType::AllowList { write } => {
                let controller = AllowListAccessController::create(
                    self.identities.clone(),
                    self.blocks.as_ref(),
                    self.writers(write),
                )
                .await?;
                Ok(Guard::Static(Arc::new(controller)))
            }
            AccessControllerType::Capability { write } => {
                let nested = OpenOptions {
                    kind: Some(CapabilityAccessController::KIND.to_string()),
                    access: AccessControllerType::AllowList {
                        write: self.writers(write),
                    },
                    ..Default::default()
                };
                let replica = self.open_capability_log(format!("{name}/_access"), nested).await?;
                Ok(Self::capability_guard(replica))
            }
        }
    }

    async fn load_access<T: Payload>(&self, address: &str) -> Result<Guard<T>, NodeError> {
        let kind = address.trim_start_matches('/').split('/').next().unwrap_or_default();
        match kind {
            AllowListAccessController::KIND => {
                let controller = AllowListAccessController::load(
                    self.identities.clone(),
                    self.blocks.as_ref(),
                    address,
                )
                .await?;
                Ok(Guard::Static(Arc::new(controller)))
            }
            CapabilityAccessController::KIND => {
                let nested = address
                    .strip_prefix("/capability")
                    .filter(|rest| Address::is_valid(rest))
                    .ok_or_else(|| NodeError::InvalidAddress(address.to_string()))?;
                debug!(%nested, "loading capability log");
                let replica = self
                    .open_capability_log(nested.to_string(), OpenOptions::default())
                    .await?;
                Ok(Self::capability_guard(replica))
            }
            _ => Err(NodeError::UnsupportedAccessController(address.to_string())),
        }
    }

    // Boxed: opening a capability-guarded log opens another log.
    fn open_capability_log(
        &self,
        name_or_address: String,
        options: OpenOptions,
    ) -> BoxFuture<'_, Result<Arc<Replica<AclOp>>, NodeError>> {
        Box::pin(async move { self.open::<AclOp>(&name_or_address, options).await })
    }

    fn capability_guard<T: Payload>(replica: Arc<Replica<AclOp>>) -> Guard<T> {
        let controller = Arc::new(CapabilityAccessController::new(replica.log().clone()));
        Guard::Capability {
            controller,
            replica,
        }
    }

    fn writers(&self, write: &[String]) -> Vec<String> {
        if write.is_empty() {
            vec![self.identity.id.clone()]
        } else {
            write.to_vec()
        }
    }
}
