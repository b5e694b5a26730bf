//! Replication of one log with the peers subscribed to it.
//!
//! On start the service registers a stream handler on the log's sync
//! protocol path and subscribes to the log's topic. Then:
//!
//! - a peer subscribing to the topic is dialed and a session is run with it;
//! - a stream opened by a peer is answered with the same session, mirrored;
//! - entries published on the topic are merged directly, or, when their
//!   ancestors or signer are unknown here, trigger a session with the sender.
//!
//! A session exchanges heads, lets each side pull the entries it lacks, and
//! ends with `join_entry` for every remote head. Failures are isolated per
//! peer and per entry: they are logged and emitted as [`SyncFailed`] events,
//! never propagated into the loops.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use weft_oplog::{Entry, Log, OplogError, Payload};
use weft_types::events::{EntryAdded, EventBus, EventOrigin, PeerJoined, PeerLeft, SyncFailed};
use weft_types::{DEFAULT_SYNC_TIMEOUT, PeerId, sync_protocol};

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::transport::{IncomingStream, MAX_MESSAGE_SIZE, MessageStream, TopicEvent, TopicId, Transport};

/// Options for [`LogSync::start`].
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Bound on dialing a peer plus the whole exchange.
    pub timeout: Duration,
    /// Peers dialed on subscription beyond this count are ignored.
    pub max_peers: usize,
    /// Entry bytes per `Entries` frame; larger replies are split.
    pub max_frame_bytes: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SYNC_TIMEOUT,
            max_peers: 64,
            max_frame_bytes: MAX_MESSAGE_SIZE / 4,
        }
    }
}

/// Sync service of one log.
pub struct LogSync<T: Payload> {
    inner: Arc<Inner<T>>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

struct Inner<T: Payload> {
    log: Arc<Log<T>>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    topic: TopicId,
    protocol: String,
    options: SyncOptions,
    peers: Mutex<HashSet<PeerId>>,
    shutdown: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

/// What a session brought back: the peer's heads and the ancestors it sent.
struct Received<T> {
    heads: Vec<Entry<T>>,
    ancestors: HashMap<String, Entry<T>>,
}

impl<T: Payload> LogSync<T> {
    /// Register the stream handler, subscribe to the topic and start
    /// serving peers.
    pub async fn start(
        log: Arc<Log<T>>,
        transport: Arc<dyn Transport>,
        events: EventBus,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let protocol = sync_protocol(log.id());
        let topic = TopicId::from_log_id(log.id());
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            log,
            transport,
            events,
            topic,
            protocol,
            options,
            peers: Mutex::new(HashSet::new()),
            shutdown,
        });

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        inner.transport.handle(&inner.protocol, incoming_tx).await?;
        let topic_rx = match inner.transport.subscribe(topic).await {
            Ok(rx) => rx,
            Err(e) => {
                inner.transport.unhandle(&inner.protocol).await;
                return Err(e);
            }
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(accept_loop(inner.clone(), incoming_rx));
        tasks.spawn(topic_loop(inner.clone(), topic_rx));

        info!(
            log_id = %inner.log.id(),
            peer = %inner.transport.local_peer(),
            %topic,
            "sync started"
        );
        Ok(Self {
            inner,
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    pub fn topic(&self) -> TopicId {
        self.inner.topic
    }

    /// Stream protocol path of this log.
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    /// Peers currently tracked, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .peers
            .lock()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    /// Publish a locally appended entry to the topic.
    pub async fn add(&self, entry: &Entry<T>) -> Result<(), SyncError> {
        self.inner
            .transport
            .publish(&self.inner.topic, entry.bytes.clone())
            .await
    }

    /// Run a session with `peer` now.
    pub async fn sync_with(&self, peer: &PeerId) -> Result<(), SyncError> {
        self.inner.dial_and_sync(peer).await
    }

    /// Stop serving: cancel pending exchanges, wait for in-flight merges,
    /// then drop the handler and the subscription.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        {
            let mut tasks = self.tasks.lock().await;
            while tasks.join_next().await.is_some() {}
        }
        self.inner.transport.unhandle(&self.inner.protocol).await;
        self.inner.transport.unsubscribe(&self.inner.topic).await;
        self.inner.peers.lock().expect("lock poisoned").clear();
        info!(log_id = %self.inner.log.id(), "sync stopped");
    }
}

async fn accept_loop<T: Payload>(
    inner: Arc<Inner<T>>,
    mut incoming: mpsc::UnboundedReceiver<IncomingStream>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = incoming.recv() => {
                let Some((peer, stream)) = next else { break };
                if !inner.track(&peer) {
                    debug!(%peer, "peer limit reached, refusing stream");
                    drop(stream);
                    continue;
                }
                let inner = inner.clone();
                sessions.spawn(async move { inner.respond(peer, stream).await });
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
    while sessions.join_next().await.is_some() {}
}

async fn topic_loop<T: Payload>(
    inner: Arc<Inner<T>>,
    mut events: mpsc::UnboundedReceiver<TopicEvent>,
) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = events.recv() => {
                let Some(event) = next else { break };
                match event {
                    TopicEvent::Message { from, data } => {
                        let inner = inner.clone();
                        sessions.spawn(async move {
                            if inner.receive_broadcast(&from, &data).await {
                                inner.initiate(from).await;
                            }
                        });
                    }
                    TopicEvent::PeerSubscribed(peer) => {
                        if inner.track(&peer) {
                            let inner = inner.clone();
                            sessions.spawn(async move { inner.initiate(peer).await });
                        } else {
                            debug!(%peer, "peer limit reached, not dialing");
                        }
                    }
                    TopicEvent::PeerUnsubscribed(peer) => {
                        inner.untrack(&peer);
                        inner.events.emit(PeerLeft {
                            log_id: inner.log.id().to_string(),
                            peer,
                        });
                    }
                }
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
    while sessions.join_next().await.is_some() {}
}

impl<T: Payload> Inner<T> {
    /// Remember `peer`. Returns `false` if the peer set is full.
    fn track(&self, peer: &PeerId) -> bool {
        let mut peers = self.peers.lock().expect("lock poisoned");
        if peers.contains(peer) {
            return true;
        }
        if peers.len() >= self.options.max_peers {
            return false;
        }
        peers.insert(peer.clone());
        true
    }

    fn untrack(&self, peer: &PeerId) {
        self.peers.lock().expect("lock poisoned").remove(peer);
    }

    fn fail(&self, peer: Option<PeerId>, message: String) {
        self.events.emit(SyncFailed {
            log_id: self.log.id().to_string(),
            peer,
            message,
        });
    }

    async fn initiate(&self, peer: PeerId) {
        match self.dial_and_sync(&peer).await {
            Ok(()) => {}
            Err(SyncError::UnsupportedProtocol { .. }) => {
                debug!(%peer, "peer does not replicate this log");
                self.untrack(&peer);
            }
            Err(SyncError::Stopped) => {}
            Err(e) => {
                warn!(%peer, log_id = %self.log.id(), error = %e, "sync failed");
                self.untrack(&peer);
                self.fail(Some(peer), e.to_string());
            }
        }
    }

    async fn respond(&self, peer: PeerId, mut stream: Box<dyn MessageStream>) {
        let exchange = self.exchange(stream.as_mut(), Role::Responder);
        match self.bounded(&peer, exchange).await {
            Ok(received) => self.apply(&peer, received).await,
            Err(SyncError::Stopped) => {}
            Err(e) => {
                warn!(%peer, log_id = %self.log.id(), error = %e, "incoming sync failed");
                self.fail(Some(peer), e.to_string());
            }
        }
    }

    async fn dial_and_sync(&self, peer: &PeerId) -> Result<(), SyncError> {
        let exchange = async {
            let mut stream = self.transport.dial(peer, &self.protocol).await?;
            self.exchange(stream.as_mut(), Role::Initiator).await
        };
        let received = self.bounded(peer, exchange).await?;
        self.apply(peer, received).await;
        Ok(())
    }

    /// Run `fut` under the sync timeout, cancelling it on shutdown.
    async fn bounded<R>(
        &self,
        peer: &PeerId,
        fut: impl Future<Output = Result<R, SyncError>>,
    ) -> Result<R, SyncError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(SyncError::Stopped);
        }
        tokio::select! {
            _ = shutdown.changed() => Err(SyncError::Stopped),
            result = tokio::time::timeout(self.options.timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout {
                    peer: peer.clone(),
                    after: self.options.timeout,
                }),
            },
        }
    }

    // Turn order keeps one side reading while the other writes:
    //
    //   initiator            responder
    //   Heads      ------>
    //              <------   Heads
    //   Pull       ------>
    //              <------   Entries (one or more frames)
    //              <------   Pull
    //   Entries    ------>
    async fn exchange(
        &self,
        stream: &mut dyn MessageStream,
        role: Role,
    ) -> Result<Received<T>, SyncError> {
        match role {
            Role::Initiator => {
                send(stream, self.heads_message().await?).await?;
                let heads = self.receive_heads(recv(stream).await?).await?;
                send(stream, self.pull_message(&heads).await?).await?;
                let ancestors = self.receive_entries(stream).await?;
                let pull = recv(stream).await?;
                self.answer_pull(stream, pull).await?;
                Ok(Received { heads, ancestors })
            }
            Role::Responder => {
                let heads = self.receive_heads(recv(stream).await?).await?;
                send(stream, self.heads_message().await?).await?;
                let pull = recv(stream).await?;
                self.answer_pull(stream, pull).await?;
                send(stream, self.pull_message(&heads).await?).await?;
                let ancestors = self.receive_entries(stream).await?;
                Ok(Received { heads, ancestors })
            }
        }
    }

    async fn apply(&self, peer: &PeerId, received: Received<T>) {
        let Received { heads, ancestors } = received;
        for head in &heads {
            match self.log.join_entry_with(head, &ancestors).await {
                Ok(true) => self.events.emit(EntryAdded {
                    log_id: self.log.id().to_string(),
                    hash: head.hash.clone(),
                    origin: EventOrigin::Remote(peer.clone()),
                }),
                Ok(false) => {}
                Err(e) => {
                    warn!(%peer, hash = %head.hash, error = %e, "rejected remote head");
                    self.fail(Some(peer.clone()), e.to_string());
                }
            }
        }

        let heads = match self.log.heads().await {
            Ok(heads) => heads.into_iter().map(|h| h.hash).collect(),
            Err(e) => {
                warn!(error = %e, "could not read heads after sync");
                Vec::new()
            }
        };
        debug!(%peer, log_id = %self.log.id(), heads = heads.len(), "peer joined");
        self.events.emit(PeerJoined {
            log_id: self.log.id().to_string(),
            peer: peer.clone(),
            heads,
        });
    }

    /// Merge an entry published on the topic. Returns `true` if a session
    /// with the sender is needed to resolve it.
    async fn receive_broadcast(&self, from: &PeerId, data: &[u8]) -> bool {
        if *from == self.transport.local_peer() {
            return false;
        }
        let entry = match Entry::<T>::decode(data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%from, error = %e, "malformed broadcast");
                self.fail(Some(from.clone()), e.to_string());
                return false;
            }
        };
        match self.log.has(&entry.hash).await {
            Ok(true) => return false,
            Ok(false) => {}
            Err(e) => {
                self.fail(Some(from.clone()), e.to_string());
                return false;
            }
        }
        match self.log.identities().get_identity(&entry.identity).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(%from, hash = %entry.hash, "unknown signer, syncing with sender");
                return true;
            }
            Err(e) => {
                self.fail(Some(from.clone()), e.to_string());
                return false;
            }
        }

        match self.log.join_entry(&entry).await {
            Ok(true) => {
                self.events.emit(EntryAdded {
                    log_id: self.log.id().to_string(),
                    hash: entry.hash,
                    origin: EventOrigin::Remote(from.clone()),
                });
                false
            }
            Ok(false) => false,
            Err(OplogError::NotFound(missing)) => {
                debug!(%from, hash = %entry.hash, missing = missing.len(), "broadcast has unknown ancestors");
                true
            }
            Err(e) => {
                warn!(%from, hash = %entry.hash, error = %e, "rejected broadcast entry");
                self.fail(Some(from.clone()), e.to_string());
                false
            }
        }
    }

    async fn heads_message(&self) -> Result<SyncMessage, SyncError> {
        let heads = self.log.heads().await?;
        Ok(SyncMessage::Heads {
            identities: self.signer_identities(&heads).await?,
            heads: heads.into_iter().map(|h| h.bytes.to_vec()).collect(),
        })
    }

    async fn pull_message(&self, remote_heads: &[Entry<T>]) -> Result<SyncMessage, SyncError> {
        let mut want = Vec::new();
        for head in remote_heads {
            if !self.log.has(&head.hash).await? {
                want.push(head.hash.clone());
            }
        }
        let have = self
            .log
            .heads()
            .await?
            .into_iter()
            .map(|h| h.hash)
            .collect();
        Ok(SyncMessage::Pull { want, have })
    }

    async fn answer_pull(
        &self,
        stream: &mut dyn MessageStream,
        message: SyncMessage,
    ) -> Result<(), SyncError> {
        let SyncMessage::Pull { want, have } = message else {
            return Err(unexpected("pull", &message));
        };
        let delta = if want.is_empty() {
            Vec::new()
        } else {
            self.log.compute_pull_delta(&want, &have).await?
        };

        let frames = split_frames(delta, self.options.max_frame_bytes);
        let last = frames.len().saturating_sub(1);
        let mut sent_signers: HashSet<String> = HashSet::new();
        for (i, frame) in frames.into_iter().enumerate() {
            let signers: HashSet<&str> = frame
                .iter()
                .map(|e| e.identity.as_str())
                .filter(|id| sent_signers.insert(id.to_string()))
                .collect();
            let message = SyncMessage::Entries {
                identities: self.identity_blobs(signers).await?,
                entries: frame.into_iter().map(|e| e.bytes.to_vec()).collect(),
                more: i < last,
            };
            send(stream, message).await?;
        }
        Ok(())
    }

    async fn receive_heads(&self, message: SyncMessage) -> Result<Vec<Entry<T>>, SyncError> {
        let SyncMessage::Heads { heads, identities } = message else {
            return Err(unexpected("heads", &message));
        };
        self.import_identities(&identities).await;
        Ok(decode_all(&heads))
    }

    async fn receive_entries(
        &self,
        stream: &mut dyn MessageStream,
    ) -> Result<HashMap<String, Entry<T>>, SyncError> {
        let mut received = HashMap::new();
        loop {
            let message = recv(stream).await?;
            let SyncMessage::Entries {
                entries,
                identities,
                more,
            } = message
            else {
                return Err(unexpected("entries", &message));
            };
            self.import_identities(&identities).await;
            received.extend(decode_all::<T>(&entries).into_iter().map(|e| (e.hash.clone(), e)));
            if !more {
                return Ok(received);
            }
        }
    }

    async fn signer_identities(&self, entries: &[Entry<T>]) -> Result<Vec<Vec<u8>>, SyncError> {
        self.identity_blobs(entries.iter().map(|e| e.identity.as_str()).collect())
            .await
    }

    async fn identity_blobs(&self, signers: HashSet<&str>) -> Result<Vec<Vec<u8>>, SyncError> {
        let mut identities = Vec::with_capacity(signers.len());
        for hash in signers {
            if let Some(bytes) = self.log.identities().identity_bytes(hash).await? {
                identities.push(bytes.to_vec());
            }
        }
        Ok(identities)
    }

    async fn import_identities(&self, identities: &[Vec<u8>]) {
        for bytes in identities {
            if let Err(e) = self.log.identities().import(bytes).await {
                warn!(error = %e, "rejected remote identity");
            }
        }
    }
}

fn decode_all<T: Payload>(blobs: &[Vec<u8>]) -> Vec<Entry<T>> {
    blobs
        .iter()
        .filter_map(|bytes| match Entry::decode(bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "malformed remote entry");
                None
            }
        })
        .collect()
}

/// Split `entries` into consecutive runs of at most `budget` entry bytes.
/// An entry larger than `budget` travels alone. Always yields one frame, so
/// an empty reply still ends the stream.
pub(crate) fn split_frames<T>(entries: Vec<Entry<T>>, budget: usize) -> Vec<Vec<Entry<T>>> {
    let mut frames = vec![Vec::new()];
    let mut size = 0;
    for entry in entries {
        let len = entry.bytes.len();
        if size + len > budget && size > 0 {
            frames.push(Vec::new());
            size = 0;
        }
        size += len;
        if let Some(frame) = frames.last_mut() {
            frame.push(entry);
        }
    }
    frames
}

fn unexpected(expected: &'static str, got: &SyncMessage) -> SyncError {
    SyncError::UnexpectedMessage {
        expected,
        got: got.kind(),
    }
}

async fn send(stream: &mut dyn MessageStream, message: SyncMessage) -> Result<(), SyncError> {
    stream.send(message.encode()?).await
}

async fn recv(stream: &mut dyn MessageStream) -> Result<SyncMessage, SyncError> {
    let bytes = stream.recv().await?.ok_or(SyncError::StreamClosed)?;
    SyncMessage::decode(&bytes)
}
