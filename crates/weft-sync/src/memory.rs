//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub shared by every [`MemoryTransport`] created
//! from it. Streams are `tokio::io::duplex` pipes wrapped in
//! [`FramedStream`], so sessions go through the same framing as a socket.
//! Peers can be marked down to simulate partitions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;
use weft_types::PeerId;

use crate::error::SyncError;
use crate::transport::{
    FramedStream, IncomingStream, MessageStream, TopicEvent, TopicId, Transport,
};

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct Hub {
    handlers: HashMap<(PeerId, String), mpsc::UnboundedSender<IncomingStream>>,
    topics: HashMap<TopicId, HashMap<PeerId, mpsc::UnboundedSender<TopicEvent>>>,
    down: HashSet<PeerId>,
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport endpoint for `peer` on this network.
    pub fn transport(&self, peer: impl Into<PeerId>) -> MemoryTransport {
        MemoryTransport {
            peer: peer.into(),
            network: self.clone(),
        }
    }

    /// Mark `peer` unreachable (or reachable again).
    ///
    /// A down peer cannot dial or be dialed, and neither sends nor receives
    /// topic messages.
    pub fn set_down(&self, peer: &PeerId, down: bool) {
        let mut hub = self.hub.lock().expect("lock poisoned");
        if down {
            hub.down.insert(peer.clone());
        } else {
            hub.down.remove(peer);
        }
    }

    /// Current subscribers of `topic`.
    pub fn subscribers(&self, topic: &TopicId) -> Vec<PeerId> {
        let hub = self.hub.lock().expect("lock poisoned");
        let mut peers: Vec<PeerId> = hub
            .topics
            .get(topic)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    peer: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.peer.clone()
    }

    async fn dial(
        &self,
        peer: &PeerId,
        protocol: &str,
    ) -> Result<Box<dyn MessageStream>, SyncError> {
        let handler = {
            let hub = self.network.hub.lock().expect("lock poisoned");
            if hub.down.contains(peer) || hub.down.contains(&self.peer) {
                return Err(SyncError::Unreachable(peer.clone()));
            }
            hub.handlers
                .get(&(peer.clone(), protocol.to_string()))
                .cloned()
        };
        let unsupported = || SyncError::UnsupportedProtocol {
            peer: peer.clone(),
            protocol: protocol.to_string(),
        };
        let handler = handler.ok_or_else(unsupported)?;

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        handler
            .send((self.peer.clone(), Box::new(FramedStream::new(remote))))
            .map_err(|_| unsupported())?;
        debug!(from = %self.peer, to = %peer, protocol, "dialed");
        Ok(Box::new(FramedStream::new(local)))
    }

    async fn handle(
        &self,
        protocol: &str,
        incoming: mpsc::UnboundedSender<IncomingStream>,
    ) -> Result<(), SyncError> {
        let mut hub = self.network.hub.lock().expect("lock poisoned");
        hub.handlers
            .insert((self.peer.clone(), protocol.to_string()), incoming);
        Ok(())
    }

    async fn unhandle(&self, protocol: &str) {
        let mut hub = self.network.hub.lock().expect("lock poisoned");
        hub.handlers
            .remove(&(self.peer.clone(), protocol.to_string()));
    }

    async fn subscribe(
        &self,
        topic: TopicId,
    ) -> Result<mpsc::UnboundedReceiver<TopicEvent>, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.network.hub.lock().expect("lock poisoned");
        let subscribers = hub.topics.entry(topic).or_default();
        // Existing subscribers learn about the newcomer and dial it.
        for (peer, sender) in subscribers.iter() {
            if *peer != self.peer {
                let _ = sender.send(TopicEvent::PeerSubscribed(self.peer.clone()));
            }
        }
        subscribers.insert(self.peer.clone(), tx);
        debug!(peer = %self.peer, %topic, "subscribed");
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &TopicId) {
        let mut hub = self.network.hub.lock().expect("lock poisoned");
        let Some(subscribers) = hub.topics.get_mut(topic) else {
            return;
        };
        if subscribers.remove(&self.peer).is_none() {
            return;
        }
        for sender in subscribers.values() {
            let _ = sender.send(TopicEvent::PeerUnsubscribed(self.peer.clone()));
        }
        if subscribers.is_empty() {
            hub.topics.remove(topic);
        }
        debug!(peer = %self.peer, %topic, "unsubscribed");
    }

    async fn publish(&self, topic: &TopicId, data: Bytes) -> Result<(), SyncError> {
        let hub = self.network.hub.lock().expect("lock poisoned");
        if hub.down.contains(&self.peer) {
            return Ok(());
        }
        if let Some(subscribers) = hub.topics.get(topic) {
            for (peer, sender) in subscribers {
                if *peer == self.peer || hub.down.contains(peer) {
                    continue;
                }
                let _ = sender.send(TopicEvent::Message {
                    from: self.peer.clone(),
                    data: data.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTOCOL: &str = "/test/1";

    #[tokio::test]
    async fn test_dial_delivers_stream_to_handler() {
        let network = MemoryNetwork::new();
        let a = network.transport("a");
        let b = network.transport("b");

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.handle(PROTOCOL, tx).await.unwrap();

        let mut outgoing = a.dial(&PeerId::new("b"), PROTOCOL).await.unwrap();
        let (from, mut incoming) = rx.recv().await.unwrap();
        assert_eq!(from, PeerId::new("a"));

        outgoing.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(incoming.recv().await.unwrap().unwrap(), Bytes::from_static(b"ping"));
        incoming.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(outgoing.recv().await.unwrap().unwrap(), Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn test_dial_without_handler_is_unsupported() {
        let network = MemoryNetwork::new();
        let a = network.transport("a");
        let b = network.transport("b");
        let (tx, _rx) = mpsc::unbounded_channel();
        b.handle(PROTOCOL, tx).await.unwrap();
        b.unhandle(PROTOCOL).await;

        let err = a.dial(&PeerId::new("b"), PROTOCOL).await.err().unwrap();
        assert!(matches!(err, SyncError::UnsupportedProtocol { .. }));
    }

    #[tokio::test]
    async fn test_down_peer_is_unreachable() {
        let network = MemoryNetwork::new();
        let a = network.transport("a");
        let b = network.transport("b");
        let (tx, _rx) = mpsc::unbounded_channel();
        b.handle(PROTOCOL, tx).await.unwrap();

        network.set_down(&PeerId::new("b"), true);
        let err = a.dial(&PeerId::new("b"), PROTOCOL).await.err().unwrap();
        assert!(matches!(err, SyncError::Unreachable(_)));

        network.set_down(&PeerId::new("b"), false);
        assert!(a.dial(&PeerId::new("b"), PROTOCOL).await.is_ok());
    }

    #[tokio::test]
    async fn test_topic_membership_and_publish() {
        let network = MemoryNetwork::new();
        let topic = TopicId::from_log_id("log");
        let a = network.transport("a");
        let b = network.transport("b");

        let mut a_events = a.subscribe(topic).await.unwrap();
        let mut b_events = b.subscribe(topic).await.unwrap();
        assert_eq!(network.subscribers(&topic), vec![PeerId::new("a"), PeerId::new("b")]);

        match a_events.recv().await.unwrap() {
            TopicEvent::PeerSubscribed(peer) => assert_eq!(peer, PeerId::new("b")),
            other => panic!("unexpected {other:?}"),
        }

        a.publish(&topic, Bytes::from_static(b"entry")).await.unwrap();
        match b_events.recv().await.unwrap() {
            TopicEvent::Message { from, data } => {
                assert_eq!(from, PeerId::new("a"));
                assert_eq!(data, Bytes::from_static(b"entry"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Publishers do not hear themselves.
        assert!(a_events.try_recv().is_err());

        b.unsubscribe(&topic).await;
        match a_events.recv().await.unwrap() {
            TopicEvent::PeerUnsubscribed(peer) => assert_eq!(peer, PeerId::new("b")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_down_peer_misses_broadcasts() {
        let network = MemoryNetwork::new();
        let topic = TopicId::from_log_id("log");
        let a = network.transport("a");
        let b = network.transport("b");
        let _a_events = a.subscribe(topic).await.unwrap();
        let mut b_events = b.subscribe(topic).await.unwrap();

        network.set_down(&PeerId::new("b"), true);
        a.publish(&topic, Bytes::from_static(b"lost")).await.unwrap();
        assert!(b_events.try_recv().is_err());
    }
}
