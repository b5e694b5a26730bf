//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use futures_lite::stream;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage, copy_all};

/// In-memory store backed by a `RwLock<BTreeMap>`.
///
/// Keys iterate in ascending order (descending with `reverse`).
#[derive(Default)]
pub struct MemoryStorage {
    pairs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.pairs.read().expect("lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.pairs
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.pairs.read().expect("lock poisoned").get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.pairs.write().expect("lock poisoned").remove(key);
        Ok(())
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        // Snapshot so the lock is not held across the consumer's awaits.
        let map = self.pairs.read().expect("lock poisoned");
        let limit = opts.limit.unwrap_or(usize::MAX);
        let pairs: Vec<_> = if opts.reverse {
            map.iter()
                .rev()
                .take(limit)
                .map(|(k, v)| Ok((k.clone(), v.clone())))
                .collect()
        } else {
            map.iter()
                .take(limit)
                .map(|(k, v)| Ok((k.clone(), v.clone())))
                .collect()
        };
        Box::pin(stream::iter(pairs))
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        let copied = copy_all(other, self).await?;
        debug!(copied, "merged into memory storage");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.pairs.write().expect("lock poisoned").clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
