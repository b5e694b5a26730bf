//! [`Replica`]: an opened log with its sync service and event stream.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};
use weft_access::{AclOp, CapabilityAccessController};
use weft_identity::Identity;
use weft_oplog::{AccessController, AppendOptions, Entry, Log, Payload};
use weft_sync::LogSync;
use weft_types::PeerId;
use weft_types::events::{EntryAdded, EventBus, EventOrigin, LogClosed, LogDropped};

use crate::address::Address;
use crate::error::NodeError;
use crate::manifest::Manifest;

/// How a replica's log is guarded.
pub(crate) enum Guard<T: Payload> {
    /// A static controller, e.g. an allow-list.
    Static(Arc<dyn AccessController<T>>),
    /// Capabilities kept in a nested replica of their own.
    Capability {
        controller: Arc<CapabilityAccessController>,
        replica: Arc<Replica<AclOp>>,
    },
}

impl<T: Payload> Guard<T> {
    pub(crate) fn controller(&self) -> Arc<dyn AccessController<T>> {
        match self {
            Self::Static(access) => access.clone(),
            Self::Capability { controller, .. } => controller.clone(),
        }
    }
}

/// A log opened on a node.
///
/// Local appends go through [`Replica::add`], which publishes the new entry
/// to peers. Entries merged from peers arrive through the sync service.
/// Both are reported on [`Replica::events`].
pub struct Replica<T: Payload> {
    address: Address,
    manifest: Manifest,
    log: Arc<Log<T>>,
    sync: Option<LogSync<T>>,
    events: EventBus,
    guard: Guard<T>,
    references_count: usize,
    closed: AtomicBool,
}

impl<T: Payload> std::fmt::Debug for Replica<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("address", &self.address.to_string())
            .field("name", &self.manifest.name)
            .field("syncing", &self.sync.is_some())
            .finish()
    }
}

impl<T: Payload> Replica<T> {
    pub(crate) fn new(
        address: Address,
        manifest: Manifest,
        log: Arc<Log<T>>,
        sync: Option<LogSync<T>>,
        events: EventBus,
        guard: Guard<T>,
        references_count: usize,
    ) -> Self {
        Self {
            address,
            manifest,
            log,
            sync,
            events,
            guard,
            references_count,
            closed: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn log(&self) -> &Arc<Log<T>> {
        &self.log
    }

    pub fn identity(&self) -> &Identity {
        self.log.identity()
    }

    pub fn access(&self) -> &Arc<dyn AccessController<T>> {
        self.log.access()
    }

    /// The capability controller, if the log is capability-guarded.
    pub fn capabilities(&self) -> Option<&Arc<CapabilityAccessController>> {
        match &self.guard {
            Guard::Capability { controller, .. } => Some(controller),
            Guard::Static(_) => None,
        }
    }

    /// The replica holding the capability log, if any.
    pub fn access_replica(&self) -> Option<&Arc<Replica<AclOp>>> {
        match &self.guard {
            Guard::Capability { replica, .. } => Some(replica),
            Guard::Static(_) => None,
        }
    }

    /// The sync service, if replication is enabled.
    pub fn sync(&self) -> Option<&LogSync<T>> {
        self.sync.as_ref()
    }

    /// Peers currently replicating this log.
    pub fn peers(&self) -> Vec<PeerId> {
        self.sync.as_ref().map(LogSync::peers).unwrap_or_default()
    }

    /// Event stream: `EntryAdded`, `PeerJoined`, `PeerLeft`, `SyncFailed`,
    /// `LogClosed` and `LogDropped`.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append `payload` and publish the new entry. Returns its hash.
    pub async fn add(&self, payload: T) -> Result<String, NodeError> {
        if self.is_closed() {
            return Err(NodeError::Closed(self.address.to_string()));
        }
        let entry = self
            .log
            .append(
                payload,
                AppendOptions {
                    references_count: self.references_count,
                },
            )
            .await?;
        self.publish(&entry).await;
        Ok(entry.hash)
    }

    /// Grant `capability` to identity `id` in the capability log and
    /// publish the change.
    pub async fn grant(&self, capability: &str, id: &str) -> Result<(), NodeError> {
        let (controller, replica) = self.capability_parts()?;
        let entry = controller.grant(capability, id).await?;
        replica.publish(&entry).await;
        Ok(())
    }

    /// Revoke `capability` from identity `id` and publish the change.
    pub async fn revoke(&self, capability: &str, id: &str) -> Result<(), NodeError> {
        let (controller, replica) = self.capability_parts()?;
        let entry = controller.revoke(capability, id).await?;
        replica.publish(&entry).await;
        Ok(())
    }

    fn capability_parts(
        &self,
    ) -> Result<(&Arc<CapabilityAccessController>, &Arc<Replica<AclOp>>), NodeError> {
        match &self.guard {
            Guard::Capability {
                controller,
                replica,
            } => Ok((controller, replica)),
            Guard::Static(access) => Err(NodeError::UnsupportedAccessController(
                access.kind().to_string(),
            )),
        }
    }

    /// Send a freshly appended entry to peers and report it locally.
    async fn publish(&self, entry: &Entry<T>) {
        if let Some(sync) = &self.sync
            && let Err(e) = sync.add(entry).await
        {
            // The entry is stored; peers pick it up on their next exchange.
            warn!(address = %self.address, hash = %entry.hash, error = %e, "publish failed");
        }
        self.events.emit(EntryAdded {
            log_id: self.log.id().to_string(),
            hash: entry.hash.clone(),
            origin: EventOrigin::Local,
        });
    }

    /// Stop syncing, wait for in-flight merges and close the storages.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), NodeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(sync) = &self.sync {
            sync.stop().await;
        }
        self.log.close().await?;
        match &self.guard {
            Guard::Static(access) => access.close().await?,
            Guard::Capability { replica, .. } => OpenReplica::close(replica.as_ref()).await?,
        }
        self.events.emit(LogClosed {
            log_id: self.log.id().to_string(),
        });
        info!(address = %self.address, "replica closed");
        Ok(())
    }

    /// Erase every entry of the log, and of its capability log if any.
    pub async fn drop_log(&self) -> Result<(), NodeError> {
        self.log.clear().await?;
        if let Guard::Capability { replica, .. } = &self.guard {
            replica.log.clear().await?;
            replica.events.emit(LogDropped {
                log_id: replica.log.id().to_string(),
            });
        }
        self.events.emit(LogDropped {
            log_id: self.log.id().to_string(),
        });
        info!(address = %self.address, "replica dropped");
        Ok(())
    }
}

/// Type-erased handle the node keeps for every open replica.
#[async_trait]
pub(crate) trait OpenReplica: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), NodeError>;
}

#[async_trait]
impl<T: Payload> OpenReplica for Replica<T> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn is_closed(&self) -> bool {
        Replica::is_closed(self)
    }

    async fn close(&self) -> Result<(), NodeError> {
        Replica::close(self).await
    }
}
