//! Tests for the oplog crate.

mod log_tests;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use weft_identity::Identities;

use crate::access::AccessController;
use crate::entry::Entry;
use crate::error::OplogError;
use crate::log::{AppendOptions, Log, LogOptions};

/// Key-value style payload used throughout the tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Op {
    op: String,
    key: String,
    value: i64,
}

fn put(key: &str, value: i64) -> Op {
    Op {
        op: "PUT".into(),
        key: key.into(),
        value,
    }
}

/// Open an in-memory log for writer `name`.
async fn test_log(name: &str, log_id: &str) -> Log<Op> {
    test_log_with(name, log_id, LogOptions::default()).await
}

async fn test_log_with(name: &str, log_id: &str, options: LogOptions<Op>) -> Log<Op> {
    let identities = Arc::new(Identities::in_memory());
    let identity = identities.create_identity(name).await.unwrap();
    Log::open(
        identities,
        identity,
        LogOptions {
            log_id: Some(log_id.into()),
            ..options
        },
    )
    .await
    .unwrap()
}

/// Append `count` sequential entries with values `0..count`.
async fn append_n(log: &Log<Op>, key: &str, count: i64) -> Vec<Entry<Op>> {
    let mut entries = Vec::new();
    for value in 0..count {
        entries.push(log.append(put(key, value), AppendOptions::default()).await.unwrap());
    }
    entries
}

fn hashes(entries: &[Entry<Op>]) -> Vec<String> {
    entries.iter().map(|e| e.hash.clone()).collect()
}

/// Heads must be exactly the held entries no other held entry names as `next`.
async fn assert_frontier(log: &Log<Op>) {
    let values = log.values().await.unwrap();
    let referenced: HashSet<&str> = values
        .iter()
        .flat_map(|e| e.next.iter().map(String::as_str))
        .collect();
    let mut expected: Vec<String> = values
        .iter()
        .filter(|e| !referenced.contains(e.hash.as_str()))
        .map(|e| e.hash.clone())
        .collect();
    expected.sort();

    let mut heads = hashes(&log.heads().await.unwrap());
    heads.sort();
    assert_eq!(heads, expected, "heads must equal the DAG frontier");
}

/// Denies every entry.
struct DenyAll;

#[async_trait]
impl AccessController<Op> for DenyAll {
    fn kind(&self) -> &str {
        "denyall"
    }

    async fn can_append(&self, _entry: &Entry<Op>) -> Result<bool, OplogError> {
        Ok(false)
    }
}

/// Allows a fixed set of signer public keys.
struct KeyList(Vec<String>);

#[async_trait]
impl AccessController<Op> for KeyList {
    fn kind(&self) -> &str {
        "keylist"
    }

    fn write(&self) -> Vec<String> {
        self.0.clone()
    }

    async fn can_append(&self, entry: &Entry<Op>) -> Result<bool, OplogError> {
        Ok(self.0.contains(&entry.key))
    }
}
