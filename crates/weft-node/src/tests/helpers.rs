//! Shared test utilities for weft-node tests.

use std::sync::Arc;
use std::time::Duration;

use weft_oplog::Payload;
use weft_store::{MemoryStorage, Storage};
use weft_sync::MemoryNetwork;
use weft_types::events::{Event, EventReceiver};

use crate::config::NodeConfig;
use crate::node::{Node, NodeOptions};
use crate::replica::Replica;

pub const WAIT: Duration = Duration::from_secs(5);

/// A node with in-memory storage and no transport.
pub async fn memory_node(id: &str) -> Node {
    Node::new(NodeConfig::in_memory(id)).await.unwrap()
}

/// In-memory nodes on one network, sharing a manifest block store so each
/// can open the others' addresses.
pub async fn networked_nodes(ids: &[&str]) -> (MemoryNetwork, Vec<Node>) {
    let network = MemoryNetwork::new();
    let blocks: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        let mut config = NodeConfig::in_memory(id);
        config.sync.timeout_ms = WAIT.as_millis() as u64;
        let node = Node::with_options(
            config,
            NodeOptions {
                transport: Some(Arc::new(network.transport(*id))),
                blocks: Some(blocks.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        nodes.push(node);
    }
    (network, nodes)
}

/// Nodes sharing manifests but not connected.
pub async fn offline_nodes(ids: &[&str]) -> Vec<Node> {
    let blocks: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        let node = Node::with_options(
            NodeConfig::in_memory(id),
            NodeOptions {
                blocks: Some(blocks.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        nodes.push(node);
    }
    nodes
}

pub async fn next_event<E: Event>(rx: &mut EventReceiver<E>) -> E {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

pub async fn values<T: Payload>(replica: &Replica<T>) -> Vec<T> {
    replica
        .log()
        .values()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect()
}

/// Wait until `replica` holds exactly `len` entries.
pub async fn wait_for_len<T: Payload>(replica: &Replica<T>, len: usize) {
    tokio::time::timeout(WAIT, async {
        while replica.log().values().await.unwrap().len() != len {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} did not reach {len} entries", replica.address()));
}
