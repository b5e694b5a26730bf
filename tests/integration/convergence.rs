//! Integration test: convergence.
//!
//! Several nodes append to one shared log concurrently; every replica ends
//! up with the same entries in the same order.

use weft_integration_tests::{TestCluster, assert_converged, values, wait_for_all};

/// Three nodes write in turn; all replicas agree on the order.
#[tokio::test]
async fn test_three_writers_converge() {
    let c = TestCluster::new(3).await;
    let replicas = c.open_shared::<String>("chat").await;

    for round in 0..4 {
        for (i, replica) in replicas.iter().enumerate() {
            replica.add(format!("n{i}-r{round}")).await.unwrap();
        }
    }

    wait_for_all(&replicas, 12).await;
    assert_converged(&replicas).await;
    c.stop().await;
}

/// Concurrent appends from every node still converge.
#[tokio::test]
async fn test_concurrent_writers_converge() {
    let c = TestCluster::new(4).await;
    let replicas = c.open_shared::<u64>("counter").await;

    let mut writers = Vec::new();
    for (i, replica) in replicas.iter().enumerate() {
        let replica = replica.clone();
        writers.push(tokio::spawn(async move {
            for n in 0..10u64 {
                replica.add(i as u64 * 100 + n).await.unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    wait_for_all(&replicas, 40).await;
    assert_converged(&replicas).await;

    // Each writer's own entries keep their relative order.
    let merged = values(&replicas[0]).await;
    for i in 0..4u64 {
        let own: Vec<u64> = merged.iter().copied().filter(|v| v / 100 == i).collect();
        assert_eq!(own, (0..10).map(|n| i * 100 + n).collect::<Vec<_>>());
    }
    c.stop().await;
}

/// A node that opens the log late receives the full history.
#[tokio::test]
async fn test_late_joiner_catches_up() {
    let c = TestCluster::new(2).await;
    let first = c
        .node(0)
        .open::<String>(
            "history",
            weft_node::OpenOptions {
                access: weft_node::AccessControllerType::AllowList {
                    write: vec!["*".to_string()],
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for i in 0..25 {
        first.add(format!("entry-{i}")).await.unwrap();
    }

    let late = c
        .node(1)
        .open::<String>(&first.address().to_string(), Default::default())
        .await
        .unwrap();
    let replicas = vec![first, late];
    wait_for_all(&replicas, 25).await;
    assert_converged(&replicas).await;
    assert_eq!(values(&replicas[1]).await.last().unwrap(), "entry-24");
    c.stop().await;
}
