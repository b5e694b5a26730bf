//! The DAG frontier of a log, persisted in its own storage.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::RwLock;
use weft_store::{IterOptions, Storage, collect};

use crate::conflict::last_write_wins;
use crate::entry::{Entry, Payload};
use crate::error::OplogError;

/// Entries not referenced as `next` by any other held entry.
///
/// Updates write the new heads before deleting the superseded ones, and
/// run under a write lock that readers share, so a reader always sees a
/// complete frontier.
pub struct Heads<T> {
    storage: Arc<dyn Storage>,
    lock: RwLock<()>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Payload> Heads<T> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
            _payload: PhantomData,
        }
    }

    /// Replace the whole set.
    pub async fn set(&self, entries: &[Entry<T>]) -> Result<(), OplogError> {
        let _guard = self.lock.write().await;
        self.replace(entries).await
    }

    /// Add `entry`, drop the heads listed in `superseded` and every head
    /// `entry` names as `next`.
    ///
    /// Returns the new set, or `None` if `entry` already was a head.
    pub async fn add(
        &self,
        entry: &Entry<T>,
        superseded: &[String],
    ) -> Result<Option<Vec<Entry<T>>>, OplogError> {
        let _guard = self.lock.write().await;
        let mut current = self.load().await?;
        if current.iter().any(|h| h.hash == entry.hash) {
            return Ok(None);
        }
        current.retain(|h| !superseded.contains(&h.hash));
        current.push(entry.clone());
        let heads = find_heads(&current);
        self.replace(&heads).await?;
        Ok(Some(heads))
    }

    pub async fn all(&self) -> Result<Vec<Entry<T>>, OplogError> {
        let _guard = self.lock.read().await;
        self.load().await
    }

    pub async fn hashes(&self) -> Result<Vec<String>, OplogError> {
        let _guard = self.lock.read().await;
        Ok(collect(self.storage.as_ref(), IterOptions::default())
            .await?
            .into_iter()
            .map(|(hash, _)| hash)
            .collect())
    }

    pub async fn clear(&self) -> Result<(), OplogError> {
        let _guard = self.lock.write().await;
        self.storage.clear().await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), OplogError> {
        let _guard = self.lock.write().await;
        self.storage.close().await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Entry<T>>, OplogError> {
        collect(self.storage.as_ref(), IterOptions::default())
            .await?
            .into_iter()
            .map(|(_, bytes)| Entry::decode(&bytes))
            .collect()
    }

    // Caller holds the write lock.
    async fn replace(&self, entries: &[Entry<T>]) -> Result<(), OplogError> {
        let keep: HashSet<&str> = entries.iter().map(|e| e.hash.as_str()).collect();
        let stale: Vec<String> = collect(self.storage.as_ref(), IterOptions::default())
            .await?
            .into_iter()
            .map(|(hash, _)| hash)
            .filter(|hash| !keep.contains(hash.as_str()))
            .collect();
        for entry in entries {
            self.storage.put(&entry.hash, entry.bytes.clone()).await?;
        }
        for hash in &stale {
            self.storage.del(hash).await?;
        }
        Ok(())
    }
}

/// The subset of `entries` that no other entry in the slice names as `next`.
///
/// Duplicates are collapsed; the result is sorted oldest first.
pub fn find_heads<T: Clone>(entries: &[Entry<T>]) -> Vec<Entry<T>> {
    let referenced: HashSet<&str> = entries
        .iter()
        .flat_map(|e| e.next.iter().map(String::as_str))
        .collect();
    let mut seen = HashSet::new();
    let mut heads: Vec<Entry<T>> = entries
        .iter()
        .filter(|e| !referenced.contains(e.hash.as_str()))
        .filter(|e| seen.insert(e.hash.clone()))
        .cloned()
        .collect();
    heads.sort_by(last_write_wins);
    heads
}
