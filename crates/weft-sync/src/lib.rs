//! Replication of weft logs between peers.
//!
//! This crate moves entries between replicas of the same log:
//!
//! - [`Transport`]: the peer network (stream dialing plus topic pub/sub),
//!   with [`MemoryNetwork`] as an in-process implementation.
//! - [`SyncMessage`]: the head-exchange wire protocol (postcard-serialized,
//!   length-prefixed by [`FramedStream`]).
//! - [`LogSync`]: the per-log service that exchanges heads with peers as
//!   they join the log's topic and merges broadcast entries.

mod error;
mod memory;
mod message;
mod sync;
mod transport;

pub use error::SyncError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::SyncMessage;
pub use sync::{LogSync, SyncOptions};
pub use transport::{
    FramedStream, IncomingStream, MAX_MESSAGE_SIZE, MessageStream, TopicEvent, TopicId, Transport,
};
