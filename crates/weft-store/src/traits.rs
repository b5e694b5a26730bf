//! Core trait and helpers for key/value storage.

use std::pin::Pin;

use bytes::Bytes;
use futures_lite::{Stream, StreamExt};

use crate::error::StoreError;

/// Lazy sequence of `(key, value)` pairs produced by [`Storage::iterator`].
pub type KvStream<'a> = Pin<Box<dyn Stream<Item = Result<(String, Bytes), StoreError>> + Send + 'a>>;

/// Options for [`Storage::iterator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterOptions {
    /// Yield at most this many pairs.
    pub limit: Option<usize>,
    /// Iterate in descending key order (ordered backends only).
    pub reverse: bool,
}

impl IterOptions {
    /// Options with a limit.
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            reverse: false,
        }
    }

    /// Options iterating in descending order.
    pub fn reversed() -> Self {
        Self {
            limit: None,
            reverse: true,
        }
    }
}

/// String-keyed byte store.
///
/// All implementations must be `Send + Sync`; every method is individually
/// atomic so a backend can be shared by several owners. Ordering across
/// calls is the caller's business.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Retrieve the value under `key`. Returns `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Lazily iterate stored pairs.
    fn iterator(&self, opts: IterOptions) -> KvStream<'_>;

    /// Import the contents of `other` into this store.
    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError>;

    /// Remove every pair.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Release resources. The store must not be used afterwards.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Copy every pair of `from` into `to`. Returns the number of pairs copied.
pub async fn copy_all(from: &dyn Storage, to: &dyn Storage) -> Result<usize, StoreError> {
    let mut stream = from.iterator(IterOptions::default());
    let mut copied = 0;
    while let Some(item) = stream.next().await {
        let (key, value) = item?;
        to.put(&key, value).await?;
        copied += 1;
    }
    Ok(copied)
}

/// Drain an iterator into a vector.
pub async fn collect(
    storage: &dyn Storage,
    opts: IterOptions,
) -> Result<Vec<(String, Bytes)>, StoreError> {
    let mut stream = storage.iterator(opts);
    let mut pairs = Vec::new();
    while let Some(item) = stream.next().await {
        pairs.push(item?);
    }
    Ok(pairs)
}
