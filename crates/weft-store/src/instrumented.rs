//! A [`Storage`] wrapper that counts calls and injects latency or failures.
//!
//! `InstrumentedStorage` wraps any `Arc<dyn Storage>`. It records how many
//! times each operation reached it, can sleep for a random duration before
//! reads and writes (seeded RNG, reproducible across runs), and can be told
//! to fail every operation to exercise error paths.
//!
//! # Example
//!
//! ```ignore
//! let store = InstrumentedStorage::new(inner)
//!     .read_latency(5, 20)    // 5-20 ms per read
//!     .write_latency(10, 30)  // 10-30 ms per write
//!     .seed(42);
//! assert_eq!(store.counts().gets, 0);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_lite::stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::traits::{IterOptions, KvStream, Storage};

/// Snapshot of the calls an [`InstrumentedStorage`] has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `put` calls.
    pub puts: usize,
    /// `get` calls.
    pub gets: usize,
    /// `del` calls.
    pub dels: usize,
    /// `iterator` calls.
    pub iterators: usize,
}

#[derive(Default)]
struct Counters {
    puts: AtomicUsize,
    gets: AtomicUsize,
    dels: AtomicUsize,
    iterators: AtomicUsize,
}

/// Call-counting, latency-injecting storage wrapper.
pub struct InstrumentedStorage {
    inner: Arc<dyn Storage>,
    counters: Counters,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    failing: AtomicBool,
}

impl InstrumentedStorage {
    /// Wrap an existing store as a pass-through.
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            counters: Counters::default(),
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            failing: AtomicBool::new(false),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Start in failing mode.
    pub fn failing(self, failing: bool) -> Self {
        self.failing.store(failing, Ordering::SeqCst);
        self
    }

    /// Toggle failing mode at runtime.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The wrapped store, bypassing instrumentation.
    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    /// Calls observed so far.
    pub fn counts(&self) -> CallCounts {
        CallCounts {
            puts: self.counters.puts.load(Ordering::SeqCst),
            gets: self.counters.gets.load(Ordering::SeqCst),
            dels: self.counters.dels.load(Ordering::SeqCst),
            iterators: self.counters.iterators.load(Ordering::SeqCst),
        }
    }

    /// Reset all counters to zero.
    pub fn reset_counts(&self) {
        self.counters.puts.store(0, Ordering::SeqCst);
        self.counters.gets.store(0, Ordering::SeqCst);
        self.counters.dels.store(0, Ordering::SeqCst);
        self.counters.iterators.store(0, Ordering::SeqCst);
    }

    fn check(&self, op: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected {op} failure"
            ))));
        }
        Ok(())
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;
        if max == 0 {
            return;
        }
        let ms = if min == max {
            min
        } else {
            self.rng.lock().expect("lock poisoned").random_range(min..=max)
        };
        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl Storage for InstrumentedStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.delay(self.write_latency_ms).await;
        self.check("put")?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.delay(self.read_latency_ms).await;
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.counters.dels.fetch_add(1, Ordering::SeqCst);
        self.delay(self.write_latency_ms).await;
        self.check("del")?;
        self.inner.del(key).await
    }

    fn iterator(&self, opts: IterOptions) -> KvStream<'_> {
        self.counters.iterators.fetch_add(1, Ordering::SeqCst);
        match self.check("iterator") {
            Ok(()) => self.inner.iterator(opts),
            Err(e) => Box::pin(stream::once(Err(e))),
        }
    }

    async fn merge(&self, other: &dyn Storage) -> Result<(), StoreError> {
        self.check("merge")?;
        self.inner.merge(other).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check("clear")?;
        self.inner.clear().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::traits::collect;

    #[tokio::test]
    async fn test_counts_calls() {
        let store = InstrumentedStorage::new(Arc::new(MemoryStorage::new()));
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();
        store.del("a").await.unwrap();
        collect(&store, IterOptions::default()).await.unwrap();

        assert_eq!(
            store.counts(),
            CallCounts {
                puts: 1,
                gets: 2,
                dels: 1,
                iterators: 1,
            }
        );
        store.reset_counts();
        assert_eq!(store.counts(), CallCounts::default());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let store = InstrumentedStorage::new(Arc::new(MemoryStorage::new())).failing(true);
        assert!(store.put("a", Bytes::from_static(b"1")).await.is_err());
        assert!(collect(&store, IterOptions::default()).await.is_err());

        store.set_failing(false);
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_latency_is_applied() {
        let store = InstrumentedStorage::new(Arc::new(MemoryStorage::new()))
            .read_latency(20, 20)
            .seed(7);
        let started = std::time::Instant::now();
        store.get("a").await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    }
}
