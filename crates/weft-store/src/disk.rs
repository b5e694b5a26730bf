//! Durable ordered storage on a fjall keyspace.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use futures_lite::stream;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage, copy_all};

/// Partition holding the pairs.
const PARTITION: &str = "items";

/// Pairs fetched per step of a lazy iteration.
const PAGE_SIZE: usize = 256;

/// Durable key/value store with ordered range iteration.
///
/// Keys are stored as their UTF-8 bytes, so iteration order is byte order.
/// Iteration pages through the keyspace instead of materializing it.
pub struct DiskStorage {
    keyspace: Keyspace,
    items: PartitionHandle,
    path: PathBuf,
    /// Keeps a temporary directory alive for the store's lifetime.
    _temp: Option<TempDir>,
}

impl DiskStorage {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let keyspace = Config::new(&path).open()?;
        let items = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
        info!(path = %path.display(), "opened disk storage");
        Ok(Self {
            keyspace,
            items,
            path,
            _temp: None,
        })
    }

    /// Open a store in a fresh temporary directory, removed on drop.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let temp = tempfile::tempdir()?;
        let mut store = Self::open(temp.path())?;
        store._temp = Some(temp);
        Ok(store)
    }

    /// Directory backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch up to `n` pairs strictly after `after` in iteration order.
    fn page(
        &self,
        after: Option<&[u8]>,
        reverse: bool,
        n: usize,
    ) -> Result<Vec<(String, Bytes)>, StoreError> {
        let range: (Bound<Vec<u8>>, Bound<Vec<u8>>) = match (after, reverse) {
            (None, _) => (Bound::Unbounded, Bound::Unbounded),
            (Some(key), false) => (Bound::Excluded(key.to_vec()), Bound::Unbounded),
            (Some(key), true) => (Bound::Unbounded, Bound::Excluded(key.to_vec())),
        };

        let mut out = Vec::with_capacity(n);
        let iter = self.items.range(range);
        if reverse {
            for item in iter.rev().take(n) {
                let (key, value) = item?;
                out.push((decode_key(&key)?, Bytes::copy_from_slice(&value)));
            }
        } else {
            for item in iter.take(n) {
                let (key, value) = item?;
                out.push((decode_key(&key)?, Bytes::copy_from_slice(&value)));
            }
        }
        Ok(out)
    }
}

fn decode_key(raw: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| StoreError::InvalidKey(format!("non utf-8 key of {} bytes", raw.len())))
}

/// Iteration state threaded through `stream::unfold`.
struct Cursor {
    after: Option<Vec<u8>>,
    buffer: VecDeque<(String, Bytes)>,
    remaining: usize,
    exhausted: bool,
}

#[async_trait::async_trait]
impl Storage for DiskStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.items.insert(key.as_bytes(), value.as_ref())?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .items
            .get(key.as_bytes())?
            .map(|value| Bytes::copy_from_slice(&value)))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.items.remove(key.as_bytes())?;
        Ok(())
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        let reverse = opts.reverse;
        let cursor = Cursor {
            after: None,
            buffer: VecDeque::new(),
            remaining: opts.limit.unwrap_or(usize::MAX),
            exhausted: false,
        };

        Box::pin(stream::unfold(cursor, move |mut cursor| async move {
            if cursor.remaining == 0 {
                return None;
            }
            if cursor.buffer.is_empty() && !cursor.exhausted {
                let want = PAGE_SIZE.min(cursor.remaining);
                match self.page(cursor.after.as_deref(), reverse, want) {
                    Ok(page) => {
                        cursor.exhausted = page.len() < want;
                        if let Some((key, _)) = page.last() {
                            cursor.after = Some(key.as_bytes().to_vec());
                        }
                        cursor.buffer.extend(page);
                    }
                    Err(e) => {
                        cursor.remaining = 0;
                        return Some((Err(e), cursor));
                    }
                }
            }
            let pair = cursor.buffer.pop_front()?;
            cursor.remaining -= 1;
            Some((Ok(pair), cursor))
        }))
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        let copied = copy_all(other, self).await?;
        debug!(copied, path = %self.path.display(), "merged into disk storage");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let keys = self
            .items
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            self.items.remove(key)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(path = %self.path.display(), "closed disk storage");
        Ok(())
    }
}
