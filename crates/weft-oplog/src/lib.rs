//! Append-only, content-addressed, signed operation log.
//!
//! A [`Log`] is a Merkle DAG of [`Entry`] values. Each entry names the
//! entries that were heads when it was written (`next`) plus a bounded set of
//! older ancestors (`refs`), carries a Lamport [`Clock`](weft_types::Clock),
//! and is signed by its writer's identity. Replicas converge by exchanging
//! heads and merging them with [`Log::join_entry`], which verifies every
//! unknown ancestor before anything is indexed.
//!
//! Ordering is deterministic: entries sort by clock time, then writer id,
//! then hash ([`last_write_wins`]). Custom tie-breakers are wrapped in
//! [`NoZeroes`] so an ambiguous comparison is rejected instead of silently
//! breaking convergence.
//!
//! Appends and merges of one log go through a single FIFO mutation lock, so
//! a local append never interleaves with a remote merge on the heads set.

mod access;
mod conflict;
mod entry;
mod error;
mod heads;
mod iter;
mod log;
mod traverse;

#[cfg(test)]
mod tests;

pub use access::{AccessController, AllowAll};
pub use conflict::{
    NoZeroes, Tiebreaker, last_write_wins, sort_by_clock_id, sort_by_clocks, sort_entries,
};
pub use entry::{Entry, Payload};
pub use error::OplogError;
pub use heads::{Heads, find_heads};
pub use iter::{IteratorOptions, LogIterator};
pub use log::{AppendOptions, Log, LogOptions};
pub use traverse::{StopFn, Traversal};
