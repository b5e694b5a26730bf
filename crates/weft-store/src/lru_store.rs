//! Bounded least-recently-used storage.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use bytes::Bytes;
use futures_lite::stream;
use ::lru::LruCache;
use weft_types::DEFAULT_LRU_SIZE;

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage, copy_all};

/// Size-bounded LRU store.
///
/// Inserting past capacity evicts the least recently used pair. `get`
/// counts as a use. Iteration runs from most to least recently used.
pub struct LruStorage {
    cache: Mutex<LruCache<String, Bytes>>,
    capacity: NonZeroUsize,
}

impl LruStorage {
    /// Create an LRU store holding at most `capacity` pairs (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LruStorage {
    fn default() -> Self {
        Self::new(DEFAULT_LRU_SIZE)
    }
}

#[async_trait::async_trait]
impl Storage for LruStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.cache
            .lock()
            .expect("lock poisoned")
            .put(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.cache.lock().expect("lock poisoned").get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.cache.lock().expect("lock poisoned").pop(key);
        Ok(())
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        let cache = self.cache.lock().expect("lock poisoned");
        let pairs: Vec<_> = cache
            .iter()
            .take(opts.limit.unwrap_or(usize::MAX))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Box::pin(stream::iter(pairs))
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        copy_all(other, self).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.cache.lock().expect("lock poisoned").clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
