//! A weft node: opening logs by name or address and replicating them.
//!
//! The [`Node`] owns the writer identity, the manifest store and every open
//! [`Replica`]. A replica bundles a log, its sync service and its event
//! stream.
//!
//! - [`Address`] / [`Manifest`]: `/weft/<manifest hash>` addressing.
//! - [`NodeConfig`]: TOML configuration.
//! - [`logging`]: tracing subscriber setup.

pub mod address;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod node;
pub mod replica;

pub use address::Address;
pub use config::NodeConfig;
pub use error::NodeError;
pub use manifest::{Manifest, ManifestStore};
pub use node::{AccessControllerType, DEFAULT_LOG_TYPE, Node, NodeOptions, OpenOptions};
pub use replica::Replica;

#[cfg(test)]
mod tests;
