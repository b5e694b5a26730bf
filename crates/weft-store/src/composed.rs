//! A fast storage layer in front of a backing layer.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures_lite::{StreamExt, stream};
use tracing::trace;

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage};

/// Read-through composition of two stores.
///
/// - `get` answers from the fast layer when it can; on a miss it reads the
///   backing layer and back-fills the fast layer.
/// - `put` and `del` apply to both layers.
/// - `iterator` yields the fast layer first, then backing pairs whose key the
///   fast layer did not already yield.
pub struct ComposedStorage {
    fast: Arc<dyn Storage>,
    backing: Arc<dyn Storage>,
}

impl ComposedStorage {
    /// Compose `fast` in front of `backing`.
    pub fn new(fast: Arc<dyn Storage>, backing: Arc<dyn Storage>) -> Self {
        Self { fast, backing }
    }

    /// The fast layer.
    pub fn fast(&self) -> &Arc<dyn Storage> {
        &self.fast
    }

    /// The backing layer.
    pub fn backing(&self) -> &Arc<dyn Storage> {
        &self.backing
    }
}

struct MergedIter<'a> {
    fast: Option<KvStream<'a>>,
    backing: KvStream<'a>,
    seen: HashSet<String>,
    remaining: usize,
}

#[async_trait::async_trait]
impl Storage for ComposedStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.fast.put(key, value.clone()).await?;
        self.backing.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        if let Some(value) = self.fast.get(key).await? {
            return Ok(Some(value));
        }
        let value = self.backing.get(key).await?;
        if let Some(value) = &value {
            trace!(key, "back-filling fast layer");
            self.fast.put(key, value.clone()).await?;
        }
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.fast.del(key).await?;
        self.backing.del(key).await
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        let layer_opts = IterOptions {
            limit: None,
            reverse: opts.reverse,
        };
        let state = MergedIter {
            fast: Some(self.fast.iterator(layer_opts)),
            backing: self.backing.iterator(layer_opts),
            seen: HashSet::new(),
            remaining: opts.limit.unwrap_or(usize::MAX),
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if state.remaining == 0 {
                    return None;
                }
                if let Some(fast) = state.fast.as_mut() {
                    match fast.next().await {
                        Some(Ok((key, value))) => {
                            state.seen.insert(key.clone());
                            state.remaining -= 1;
                            return Some((Ok((key, value)), state));
                        }
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => state.fast = None,
                    }
                    continue;
                }
                match state.backing.next().await {
                    Some(Ok((key, _))) if state.seen.contains(&key) => continue,
                    Some(Ok(pair)) => {
                        state.remaining -= 1;
                        return Some((Ok(pair), state));
                    }
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => return None,
                }
            }
        }))
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        self.fast.merge(other).await?;
        self.backing.merge(other).await?;
        other.merge(self.fast.as_ref()).await?;
        other.merge(self.backing.as_ref()).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.fast.clear().await?;
        self.backing.clear().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.fast.close().await?;
        self.backing.close().await
    }
}
