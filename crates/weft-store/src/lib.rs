//! Key/value storage for weft.
//!
//! This crate defines the [`Storage`] trait, a uniform string-keyed byte
//! store, and the backends the log and identity layers compose:
//!
//! - [`MemoryStorage`]: in-process ordered map, no persistence.
//! - [`LruStorage`]: bounded least-recently-used cache.
//! - [`DiskStorage`]: durable ordered store on a fjall keyspace.
//! - [`BlockStorage`]: content-addressed block files with pinning and
//!   per-operation timeouts.
//! - [`ComposedStorage`]: a fast layer in front of a backing layer.
//! - [`InstrumentedStorage`]: call counting and injected latency around any
//!   other backend, for tests.

mod block;
mod composed;
mod disk;
mod error;
mod instrumented;
mod lru_store;
mod memory;
mod traits;

pub use block::BlockStorage;
pub use composed::ComposedStorage;
pub use disk::DiskStorage;
pub use error::StoreError;
pub use instrumented::{CallCounts, InstrumentedStorage};
pub use lru_store::LruStorage;
pub use memory::MemoryStorage;
pub use traits::{IterOptions, KvStream, Storage, collect, copy_all};
