//! Log addresses: `/weft/<manifest hash>`.

use std::fmt;
use std::str::FromStr;

use weft_types::{ADDRESS_PROTOCOL, is_content_address};

use crate::error::NodeError;

/// Address of a log: the content address of its manifest under the
/// `weft` protocol segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    hash: String,
}

impl Address {
    /// Address of the manifest stored under `hash`.
    pub fn new(hash: impl Into<String>) -> Result<Self, NodeError> {
        let hash = hash.into();
        if !is_content_address(&hash) {
            return Err(NodeError::InvalidAddress(hash));
        }
        Ok(Self { hash })
    }

    /// Parse `/weft/<hash>`. Backslash separators are accepted too.
    pub fn parse(address: &str) -> Result<Self, NodeError> {
        let invalid = || NodeError::InvalidAddress(address.to_string());
        let normalized = address.replace('\\', "/");
        let hash = normalized
            .strip_prefix('/')
            .and_then(|rest| rest.strip_prefix(ADDRESS_PROTOCOL))
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|hash| !hash.contains('/'))
            .ok_or_else(invalid)?;
        if !is_content_address(hash) {
            return Err(invalid());
        }
        Ok(Self {
            hash: hash.to_string(),
        })
    }

    /// Whether `address` parses.
    pub fn is_valid(address: &str) -> bool {
        Self::parse(address).is_ok()
    }

    /// The manifest hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn protocol(&self) -> &str {
        ADDRESS_PROTOCOL
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{ADDRESS_PROTOCOL}/{}", self.hash)
    }
}

impl FromStr for Address {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
