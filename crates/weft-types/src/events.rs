//! Typed event bus for replica events.
//!
//! Each replica owns an [`EventBus`]. The log, the sync service and the
//! replica itself emit typed events on it; applications subscribe to the
//! event types they care about without holding a reference to the emitter.
//!
//! # Design
//!
//! Each event type is a distinct struct implementing the [`Event`] marker
//! trait. Internally the bus keeps a `HashMap<TypeId, Box<dyn Any>>` whose
//! values are `tokio::sync::broadcast::Sender<E>`, created lazily on the first
//! `subscribe()` for a type. Emitting a type nobody subscribed to is a no-op.
//!
//! # Example
//!
//! ```rust
//! use weft_types::events::{EntryAdded, EventBus, EventOrigin};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<EntryAdded>();
//!
//! bus.emit(EntryAdded {
//!     log_id: "/weft/zdpu".into(),
//!     hash: "zb2rh".into(),
//!     origin: EventOrigin::Local,
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.hash, "zb2rh");
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::PeerId;

/// Marker trait for everything that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Whether an entry was written locally or merged from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOrigin {
    /// Appended by this replica.
    Local,
    /// Received from a peer and merged with `join_entry`.
    Remote(PeerId),
}

/// An entry became part of the log (the `update` event).
#[derive(Clone, Debug)]
pub struct EntryAdded {
    /// Log the entry belongs to.
    pub log_id: String,
    /// Hash of the new entry.
    pub hash: String,
    /// Where the entry came from.
    pub origin: EventOrigin,
}
impl Event for EntryAdded {}

/// A head exchange with a peer completed (the `join` event).
#[derive(Clone, Debug)]
pub struct PeerJoined {
    /// Log that was exchanged.
    pub log_id: String,
    /// The peer.
    pub peer: PeerId,
    /// Our head hashes after the exchange.
    pub heads: Vec<String>,
}
impl Event for PeerJoined {}

/// A peer unsubscribed from the log topic (the `leave` event).
#[derive(Clone, Debug)]
pub struct PeerLeft {
    /// Log the peer left.
    pub log_id: String,
    /// The peer.
    pub peer: PeerId,
}
impl Event for PeerLeft {}

/// A sync-level failure (the `error` event). Never fatal.
#[derive(Clone, Debug)]
pub struct SyncFailed {
    /// Log being synchronised.
    pub log_id: String,
    /// Peer involved, if known.
    pub peer: Option<PeerId>,
    /// Rendered error.
    pub message: String,
}
impl Event for SyncFailed {}

/// The replica was closed.
#[derive(Clone, Debug)]
pub struct LogClosed {
    /// Closed log.
    pub log_id: String,
}
impl Event for LogClosed {}

/// The replica was dropped and its storage erased.
#[derive(Clone, Debug)]
pub struct LogDropped {
    /// Dropped log.
    pub log_id: String,
}
impl Event for LogDropped {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Type-erased `broadcast::Sender<E>` per event type.
struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// Clonable, thread-safe event bus with non-blocking emits.
///
/// Each event type gets its own `tokio::broadcast` channel, so subscribers
/// of [`PeerLeft`] never see [`EntryAdded`].
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// Events without subscribers are dropped.
    pub fn emit<E: Event>(&self, event: E) {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        if let Some(sender) = inner
            .channels
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            // An error only means every receiver is gone.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let type_id = TypeId::of::<E>();

        if let Some(sender) = inner
            .channels
            .get(&type_id)
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            return EventReceiver {
                rx: sender.subscribe(),
            };
        }

        let (tx, rx) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
        inner.channels.insert(type_id, Box::new(tx));
        EventReceiver { rx }
    }

    /// Number of event types that currently have a channel.
    pub fn channel_count(&self) -> usize {
        self.inner
            .lock()
            .expect("event bus lock poisoned")
            .channels
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("channel_count", &self.channel_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for one event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once every bus handle is dropped. Lagged events are
    /// skipped with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
