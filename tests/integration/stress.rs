//! Integration test: volume.
//!
//! Longer logs with a small reference window, replicated to a fresh node.

use weft_integration_tests::{TestCluster, assert_converged, hashes, wait_for_all};
use weft_node::{AccessControllerType, OpenOptions};
use weft_oplog::IteratorOptions;

/// 300 entries written on one node replicate to another in one exchange.
#[tokio::test]
async fn test_long_log_replicates() {
    let c = TestCluster::new(2).await;
    let writer = c
        .node(0)
        .open::<u64>(
            "long",
            OpenOptions {
                access: AccessControllerType::AllowList {
                    write: vec!["*".to_string()],
                },
                references_count: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for n in 0..300u64 {
        writer.add(n).await.unwrap();
    }

    let reader = c
        .node(1)
        .open::<u64>(&writer.address().to_string(), OpenOptions::default())
        .await
        .unwrap();
    let replicas = vec![writer, reader];
    wait_for_all(&replicas, 300).await;
    assert_converged(&replicas).await;

    let all = hashes(&replicas[1]).await;
    let mut it = replicas[1]
        .log()
        .iterator(IteratorOptions {
            amount: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut newest = Vec::new();
    while let Some(entry) = it.next().await.unwrap() {
        newest.push(entry.hash);
    }
    let expected: Vec<String> = all.iter().rev().take(10).cloned().collect();
    assert_eq!(newest, expected);
    c.stop().await;
}

/// Many small logs opened side by side replicate independently.
#[tokio::test]
async fn test_many_logs() {
    let c = TestCluster::new(2).await;
    let mut pairs = Vec::new();
    for i in 0..8 {
        let replicas = c.open_shared::<String>(&format!("log-{i}")).await;
        for n in 0..5 {
            replicas[n % 2].add(format!("{i}-{n}")).await.unwrap();
        }
        pairs.push(replicas);
    }
    for replicas in &pairs {
        wait_for_all(replicas, 5).await;
        assert_converged(replicas).await;
    }
    c.stop().await;
}
