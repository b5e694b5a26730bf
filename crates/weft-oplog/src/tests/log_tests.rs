//! Tests for append, heads, references and log lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use weft_identity::Identities;
use weft_store::{MemoryStorage, Storage};
use weft_types::Clock;

use super::{DenyAll, KeyList, Op, append_n, assert_frontier, hashes, put, test_log, test_log_with};
use crate::entry::Entry;
use crate::error::OplogError;
use crate::log::{AppendOptions, Log, LogOptions};

#[tokio::test]
async fn test_single_writer_sequence() {
    let log = test_log("alice", "log").await;
    let entries = append_n(&log, "x", 3).await;

    let heads = log.heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].hash, entries[2].hash);

    let values: Vec<i64> = log
        .values()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.payload.value)
        .collect();
    assert_eq!(values, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_append_links_to_previous_head() {
    let log = test_log("alice", "log").await;
    let entries = append_n(&log, "x", 3).await;

    assert!(entries[0].next.is_empty());
    assert_eq!(entries[1].next, vec![entries[0].hash.clone()]);
    assert_eq!(entries[2].next, vec![entries[1].hash.clone()]);
    assert_eq!(
        entries.iter().map(|e| e.clock.time).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(entries.iter().all(|e| e.clock.id == log.identity().public_key));
    assert_frontier(&log).await;
}

#[tokio::test]
async fn test_append_indexes_entry() {
    let log = test_log("alice", "log").await;
    let entry = log.append(put("x", 1), AppendOptions::default()).await.unwrap();
    assert!(log.has(&entry.hash).await.unwrap());
    assert_eq!(log.get(&entry.hash).await.unwrap(), Some(entry));
}

#[tokio::test]
async fn test_refs_skip_heads_and_are_bounded() {
    let log = test_log("alice", "log").await;
    let entries = append_n(&log, "x", 5).await;

    // The fifth entry references its ancestors beyond the head it extends.
    assert_eq!(
        entries[4].refs,
        vec![
            entries[2].hash.clone(),
            entries[1].hash.clone(),
            entries[0].hash.clone()
        ]
    );

    let small = log
        .append(put("x", 9), AppendOptions { references_count: 1 })
        .await
        .unwrap();
    // One head, so at most 1 + 1 refs.
    assert!(small.refs.len() <= 2);
    assert!(!small.refs.contains(&entries[4].hash));

    let none = log
        .append(put("x", 10), AppendOptions { references_count: 0 })
        .await
        .unwrap();
    assert_eq!(none.refs, vec![entries[4].hash.clone()]);
}

#[tokio::test]
async fn test_get_references_bounded() {
    let log = test_log("alice", "log").await;
    append_n(&log, "x", 10).await;
    let heads = log.heads().await.unwrap();
    let head_hashes = hashes(&heads);

    for amount in [0, 1, 3, 8, 50] {
        let refs = log.get_references(&heads, amount).await.unwrap();
        assert!(refs.len() <= amount);
        assert!(refs.iter().all(|r| !head_hashes.contains(r)));
    }
    assert_eq!(log.get_references(&heads, 50).await.unwrap().len(), 9);
}

#[tokio::test]
async fn test_append_denied_leaves_no_trace() {
    let log = test_log_with(
        "alice",
        "log",
        LogOptions {
            access: Some(Arc::new(DenyAll)),
            ..Default::default()
        },
    )
    .await;

    let err = log
        .append(put("x", 1), AppendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OplogError::Authorization(_)));
    assert!(log.heads().await.unwrap().is_empty());
    assert!(log.values().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_writer_outside_write_set_is_rejected() {
    let identities = Arc::new(Identities::in_memory());
    let alice = identities.create_identity("alice").await.unwrap();
    let bob = identities.create_identity("bob").await.unwrap();
    let access = Arc::new(KeyList(vec![alice.public_key.clone()]));

    let alice_log: Log<Op> = Log::open(
        identities.clone(),
        alice,
        LogOptions {
            log_id: Some("log".into()),
            access: Some(access.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let bob_log: Log<Op> = Log::open(
        identities,
        bob,
        LogOptions {
            log_id: Some("log".into()),
            access: Some(access),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let entry = alice_log
        .append(put("x", 1), AppendOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        bob_log.append(put("x", 2), AppendOptions::default()).await,
        Err(OplogError::Authorization(_))
    ));

    // Bob can still replicate Alice's writes.
    assert!(bob_log.join_entry(&entry).await.unwrap());
    assert_eq!(bob_log.heads().await.unwrap()[0].hash, entry.hash);
}

#[tokio::test]
async fn test_clock_follows_remote_heads() {
    let alice = test_log("alice", "log").await;
    let bob = test_log("bob", "log").await;
    let entries = append_n(&alice, "x", 5).await;

    bob.join_entry(&entries[4]).await.unwrap_err();
    bob.join(&alice).await.unwrap();
    assert_eq!(bob.clock().await.unwrap().time, 5);
    assert_eq!(bob.clock().await.unwrap().id, bob.identity().public_key);

    let next = bob.append(put("x", 5), AppendOptions::default()).await.unwrap();
    assert_eq!(next.clock.time, 6);
    assert_eq!(next.next, vec![entries[4].hash.clone()]);
}

async fn entry_at(log: &Log<Op>, time: u64, value: i64) -> Entry<Op> {
    Entry::create(
        log.identities(),
        log.identity(),
        log.id(),
        put("x", value),
        Some(Clock::new(log.identity().public_key.clone(), time)),
        Vec::new(),
        Vec::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_exhausted_remote_clock_is_rejected() {
    let alice = test_log("alice", "log").await;
    let bob = test_log("bob", "log").await;

    let exhausted = entry_at(&alice, u64::MAX, 1).await;
    let err = bob.join_entry(&exhausted).await.unwrap_err();
    assert!(matches!(err, OplogError::Validation(_)), "{err}");
    assert!(bob.heads().await.unwrap().is_empty());
    assert!(!bob.has(&exhausted.hash).await.unwrap());

    // The last usable time is accepted, but nothing can be appended on top.
    let last = entry_at(&alice, u64::MAX - 1, 2).await;
    assert!(bob.join_entry(&last).await.unwrap());
    let err = bob.append(put("x", 3), AppendOptions::default()).await.unwrap_err();
    assert!(matches!(err, OplogError::Validation(_)), "{err}");
    assert_eq!(hashes(&bob.heads().await.unwrap()), vec![last.hash.clone()]);
    assert_eq!(bob.values().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_an_empty_frontier() {
    let log = Arc::new(test_log("alice", "log").await);
    append_n(&log, "x", 1).await;

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..3 {
        let log = log.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) {
                let heads = log.heads().await.unwrap();
                assert!(!heads.is_empty(), "frontier seen mid-update");
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        }));
    }

    let other = test_log("bob", "log").await;
    for value in 0..300 {
        log.append(put("x", value), AppendOptions::default()).await.unwrap();
        if value % 50 == 0 {
            // A merge replaces the frontier too.
            let remote = other.append(put("y", value), AppendOptions::default()).await.unwrap();
            log.join(&other).await.unwrap();
            log.append(put("x", value), AppendOptions::default()).await.unwrap();
            other.join(&log).await.unwrap();
            assert!(log.has(&remote.hash).await.unwrap());
        }
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    assert_frontier(&log).await;
}

#[tokio::test]
async fn test_concurrent_appends_form_a_chain() {
    let log = Arc::new(test_log("alice", "log").await);
    let mut tasks = Vec::new();
    for value in 0..8 {
        let log = log.clone();
        tasks.push(tokio::spawn(async move {
            log.append(put("x", value), AppendOptions::default()).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let values = log.values().await.unwrap();
    assert_eq!(values.len(), 8);
    assert_eq!(log.heads().await.unwrap().len(), 1);
    let times: Vec<u64> = values.iter().map(|e| e.clock.time).collect();
    assert_eq!(times, (1..=8).collect::<Vec<_>>());
    assert_frontier(&log).await;
}

#[tokio::test]
async fn test_reopen_over_same_storages() {
    let identities = Arc::new(Identities::in_memory());
    let identity = identities.create_identity("alice").await.unwrap();
    let entries: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let heads: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let index: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let options = || LogOptions::<Op> {
        log_id: Some("log".into()),
        entry_storage: Some(entries.clone()),
        heads_storage: Some(heads.clone()),
        index_storage: Some(index.clone()),
        ..Default::default()
    };

    let log = Log::open(identities.clone(), identity.clone(), options())
        .await
        .unwrap();
    let written = append_n(&log, "x", 3).await;

    let reopened = Log::open(identities, identity, options()).await.unwrap();
    assert_eq!(hashes(&reopened.heads().await.unwrap()), vec![written[2].hash.clone()]);
    assert_eq!(hashes(&reopened.values().await.unwrap()), hashes(&written));
}

#[tokio::test]
async fn test_open_with_initial_heads() {
    let source = test_log("alice", "log").await;
    let written = append_n(&source, "x", 2).await;

    let log = test_log_with(
        "alice",
        "log",
        LogOptions {
            entry_storage: Some(source.storage().clone()),
            log_heads: vec![written[0].clone()],
            ..Default::default()
        },
    )
    .await;
    assert_eq!(hashes(&log.heads().await.unwrap()), vec![written[0].hash.clone()]);
    assert_eq!(log.values().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_rejects_empty_id_and_generates_one() {
    let identities = Arc::new(Identities::in_memory());
    let identity = identities.create_identity("alice").await.unwrap();

    let empty = Log::<Op>::open(
        identities.clone(),
        identity.clone(),
        LogOptions {
            log_id: Some(String::new()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(empty, Err(OplogError::Validation(_))));

    let a = Log::<Op>::open(identities.clone(), identity.clone(), LogOptions::default())
        .await
        .unwrap();
    let b = Log::<Op>::open(identities, identity, LogOptions::default())
        .await
        .unwrap();
    assert!(!a.id().is_empty());
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn test_clear_erases_everything() {
    let log = test_log("alice", "log").await;
    let entries = append_n(&log, "x", 3).await;
    log.clear().await.unwrap();

    assert!(log.heads().await.unwrap().is_empty());
    assert!(log.values().await.unwrap().is_empty());
    assert!(!log.has(&entries[0].hash).await.unwrap());

    // The log is usable again.
    let fresh = log.append(put("x", 1), AppendOptions::default()).await.unwrap();
    assert!(fresh.next.is_empty());
    assert_eq!(fresh.clock.time, 1);
}

#[tokio::test]
async fn test_close_waits_for_appends() {
    let log = Arc::new(test_log("alice", "log").await);
    let appender = {
        let log = log.clone();
        tokio::spawn(async move { append_n(&log, "x", 5).await })
    };
    let written = appender.await.unwrap();
    log.close().await.unwrap();
    assert_eq!(written.len(), 5);
}
