//! Content-addressed block storage.
//!
//! Blocks are files keyed by their content address, laid out with a
//! next-to-last-two fan-out: `{base_dir}/blocks/{key[n-3..n-1]}/{key}`.
//! Pins are empty marker files under `{base_dir}/pins/{key}`; [`BlockStorage::gc`]
//! removes every block without one.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures_lite::{StreamExt, stream};
use tracing::{debug, warn};
use weft_types::{DEFAULT_BLOCK_TIMEOUT, is_content_address};

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage};

/// File-backed block store keyed by content address.
///
/// Writes are atomic (temp file + rename). Every operation is bounded by
/// the configured timeout and fails with [`StoreError::Timeout`] when
/// exceeded.
pub struct BlockStorage {
    blocks_dir: PathBuf,
    pins_dir: PathBuf,
    pin: bool,
    timeout: Duration,
}

impl BlockStorage {
    /// Open a block store rooted at `base_dir`, creating it if needed.
    ///
    /// Blocks are pinned on `put` and operations time out after
    /// [`DEFAULT_BLOCK_TIMEOUT`].
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref();
        let blocks_dir = base_dir.join("blocks");
        let pins_dir = base_dir.join("pins");
        std::fs::create_dir_all(&blocks_dir)?;
        std::fs::create_dir_all(&pins_dir)?;
        Ok(Self {
            blocks_dir,
            pins_dir,
            pin: true,
            timeout: DEFAULT_BLOCK_TIMEOUT,
        })
    }

    /// Whether `put` pins blocks against [`gc`](Self::gc).
    pub fn pin(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }

    /// Bound every operation by `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn block_path(&self, key: &str) -> PathBuf {
        let n = key.len();
        self.blocks_dir.join(&key[n - 3..n - 1]).join(key)
    }

    fn pin_path(&self, key: &str) -> PathBuf {
        self.pins_dir.join(key)
    }

    fn check_key(key: &str) -> Result<(), StoreError> {
        if is_content_address(key) {
            Ok(())
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, key, timeout = ?self.timeout, "block operation timed out");
                Err(StoreError::Timeout {
                    op,
                    key: key.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    /// Pin `key` so [`gc`](Self::gc) keeps it.
    pub async fn pin_block(&self, key: &str) -> Result<(), StoreError> {
        Self::check_key(key)?;
        tokio::fs::write(self.pin_path(key), b"").await?;
        Ok(())
    }

    /// Remove the pin on `key`.
    pub async fn unpin_block(&self, key: &str) -> Result<(), StoreError> {
        Self::check_key(key)?;
        remove_if_exists(&self.pin_path(key)).await
    }

    /// Whether `key` is pinned.
    pub async fn is_pinned(&self, key: &str) -> Result<bool, StoreError> {
        Self::check_key(key)?;
        exists(&self.pin_path(key)).await
    }

    /// Delete every unpinned block. Returns the number of blocks removed.
    pub async fn gc(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (key, path) in self.list().await? {
            if !exists(&self.pin_path(&key)).await? {
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }
        debug!(removed, "block gc complete");
        Ok(removed)
    }

    /// Walk the fan-out: blocks/XX/<key>.
    async fn list(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut keys = Vec::new();
        let mut shards = tokio::fs::read_dir(&self.blocks_dir).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if !file.file_type().await?.is_file() {
                    continue;
                }
                if let Some(name) = file.file_name().to_str()
                    && is_content_address(name)
                {
                    keys.push((name.to_string(), file.path()));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

#[async_trait::async_trait]
impl Storage for BlockStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        Self::check_key(key)?;
        self.bounded("put", key, async {
            let path = self.block_path(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp_path = path.with_extension("tmp");
            tokio::fs::write(&tmp_path, &value).await?;
            tokio::fs::rename(&tmp_path, &path).await?;
            if self.pin {
                tokio::fs::write(self.pin_path(key), b"").await?;
            }
            debug!(key, size = value.len(), pinned = self.pin, "stored block");
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        if !is_content_address(key) {
            return Ok(None);
        }
        self.bounded("get", key, async {
            match tokio::fs::read(self.block_path(key)).await {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StoreError::Io(e)),
            }
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        if !is_content_address(key) {
            return Ok(());
        }
        self.bounded("del", key, async {
            remove_if_exists(&self.block_path(key)).await?;
            remove_if_exists(&self.pin_path(key)).await
        })
        .await
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        let limit = opts.limit.unwrap_or(usize::MAX);
        let reverse = opts.reverse;

        // Keys are listed on first poll; block contents are read on demand.
        Box::pin(stream::unfold(
            None::<VecDeque<(String, PathBuf)>>,
            move |listed| async move {
                let mut keys = match listed {
                    Some(keys) => keys,
                    None => match self.list().await {
                        Ok(mut keys) => {
                            if reverse {
                                keys.reverse();
                            }
                            keys.truncate(limit);
                            VecDeque::from(keys)
                        }
                        Err(e) => return Some((Err(e), Some(VecDeque::new()))),
                    },
                };
                let (key, path) = keys.pop_front()?;
                let item = match tokio::fs::read(&path).await {
                    Ok(data) => Ok((key, Bytes::from(data))),
                    Err(e) => Err(StoreError::Io(e)),
                };
                Some((item, Some(keys)))
            },
        ))
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        let mut imported = 0;
        let mut skipped = 0;
        let mut stream = other.iterator(IterOptions::default());
        while let Some(item) = stream.next().await {
            let (key, value) = item?;
            if is_content_address(&key) {
                self.put(&key, value).await?;
                imported += 1;
            } else {
                skipped += 1;
            }
        }
        debug!(imported, skipped, "merged into block storage");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        for (key, path) in self.list().await? {
            remove_if_exists(&path).await?;
            remove_if_exists(&self.pin_path(&key)).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
