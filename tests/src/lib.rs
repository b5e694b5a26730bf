//! Shared harness for weft integration tests.
//!
//! [`TestCluster`] runs N in-memory nodes on one [`MemoryNetwork`]. The
//! nodes share a manifest block store so any node can open an address
//! created by another. Peers can be taken down to simulate partitions.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use weft_node::{AccessControllerType, Node, NodeConfig, NodeOptions, OpenOptions, Replica};
use weft_oplog::Payload;
use weft_store::{MemoryStorage, Storage};
use weft_sync::MemoryNetwork;
use weft_types::PeerId;

/// How long a test waits for replicas to settle.
pub const SETTLE: Duration = Duration::from_secs(10);

/// Install a test log subscriber once. `RUST_LOG` selects the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// N nodes on one in-memory network.
pub struct TestCluster {
    network: MemoryNetwork,
    nodes: Vec<Node>,
}

impl TestCluster {
    /// Start `n` nodes named `node-0` .. `node-{n-1}`.
    pub async fn new(n: usize) -> Self {
        init_logging();
        let network = MemoryNetwork::new();
        let blocks: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let name = Self::name(i);
            let mut config = NodeConfig::in_memory(&name);
            config.sync.timeout_ms = SETTLE.as_millis() as u64;
            let node = Node::with_options(
                config,
                NodeOptions {
                    transport: Some(Arc::new(network.transport(name.as_str()))),
                    blocks: Some(blocks.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            nodes.push(node);
        }
        Self { network, nodes }
    }

    pub fn name(i: usize) -> String {
        format!("node-{i}")
    }

    pub fn peer(i: usize) -> PeerId {
        PeerId::new(Self::name(i))
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Take node `i` off the network, or bring it back.
    pub fn set_down(&self, i: usize, down: bool) {
        self.network.set_down(&Self::peer(i), down);
    }

    /// Open a log writable by every node on node 0, then open its address
    /// on every other node. Returns one replica per node.
    pub async fn open_shared<T: Payload>(&self, name: &str) -> Vec<Arc<Replica<T>>> {
        let first = self.nodes[0]
            .open::<T>(
                name,
                OpenOptions {
                    access: AccessControllerType::AllowList {
                        write: vec!["*".to_string()],
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let address = first.address().to_string();
        let mut replicas = vec![first];
        for node in &self.nodes[1..] {
            replicas.push(node.open::<T>(&address, OpenOptions::default()).await.unwrap());
        }
        replicas
    }

    pub async fn stop(&self) {
        for node in &self.nodes {
            node.stop().await.unwrap();
        }
    }
}

/// Payloads of `replica` in log order.
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

/// Entry hashes of `replica` in log order.
pub async fn hashes<T: Payload>(replica: &Replica<T>) -> Vec<String> {
    replica
        .log()
        .values()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.hash)
        .collect()
}

/// Wait until every replica holds `len` entries.
pub async fn wait_for_all<T: Payload>(replicas: &[Arc<Replica<T>>], len: usize) {
    let settled = tokio::time::timeout(SETTLE, async {
        loop {
            let mut done = true;
            for replica in replicas {
                if replica.log().values().await.unwrap().len() != len {
                    done = false;
                    break;
                }
            }
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if settled.is_err() {
        let mut counts = Vec::new();
        for replica in replicas {
            counts.push(replica.log().values().await.unwrap().len());
        }
        panic!("replicas did not reach {len} entries: {counts:?}");
    }
}

/// Assert every replica holds the same entries in the same order.
pub async fn assert_converged<T: Payload>(replicas: &[Arc<Replica<T>>]) {
    let expected = hashes(&replicas[0]).await;
    for (i, replica) in replicas.iter().enumerate().skip(1) {
        assert_eq!(hashes(replica).await, expected, "replica {i} diverged");
    }
}
