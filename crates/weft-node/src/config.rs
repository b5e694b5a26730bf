//! TOML configuration for a weft node.
//!
//! Every section is optional; missing keys take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use weft_types::{
    DEFAULT_BLOCK_TIMEOUT, DEFAULT_CACHE_SIZE, DEFAULT_REFERENCES_COUNT, DEFAULT_SYNC_TIMEOUT,
};

use crate::error::NodeError;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity and data directory.
    pub node: NodeSection,
    /// Log tuning.
    pub log: LogSection,
    /// Storage backends.
    pub storage: StorageSection,
    /// Replication.
    pub sync: SyncSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// `[node]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for keys, identities, manifests and log data.
    pub directory: PathBuf,
    /// Name of the node's writer identity. Random when empty.
    pub id: String,
    /// Keep everything in memory; `directory` is not touched.
    pub in_memory: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        let directory = dirs::data_dir()
            .map(|d| d.join("weft"))
            .unwrap_or_else(|| PathBuf::from("./weft"));
        Self {
            directory,
            id: String::new(),
            in_memory: false,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Number of older ancestors referenced by each appended entry.
    pub references_count: usize,
    /// Capacity of the LRU layer in front of entries, heads, index and
    /// manifests.
    pub cache_size: usize,
    /// Capacity of the verified-identity cache.
    pub identity_cache_size: usize,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            references_count: DEFAULT_REFERENCES_COUNT,
            cache_size: DEFAULT_CACHE_SIZE,
            identity_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Bound on a single block read or write, in milliseconds.
    pub block_timeout_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            block_timeout_ms: DEFAULT_BLOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Replicate opened logs with peers.
    pub enabled: bool,
    /// Bound on dialing a peer and exchanging heads, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of peers dialed per log.
    pub max_peers: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: DEFAULT_SYNC_TIMEOUT.as_millis() as u64,
            max_peers: 64,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"weft_sync=trace"`).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file, or use the defaults if no path given.
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// A configuration that keeps everything in memory, for tests.
    pub fn in_memory(id: &str) -> Self {
        let mut config = Self::default();
        config.node.id = id.to_string();
        config.node.in_memory = true;
        config
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.block_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.timeout_ms)
    }
}
