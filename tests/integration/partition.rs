//! Integration test: partitions.
//!
//! Nodes keep writing while cut off from each other. Once the network
//! heals, an explicit exchange merges the diverged histories.

use weft_integration_tests::{TestCluster, assert_converged, values, wait_for_all};

/// Two sides of a partition write independently, then converge.
#[tokio::test]
async fn test_partition_heals() {
    let c = TestCluster::new(2).await;
    let replicas = c.open_shared::<String>("split").await;

    replicas[0].add("before".into()).await.unwrap();
    wait_for_all(&replicas, 1).await;

    c.set_down(1, true);
    for i in 0..5 {
        replicas[0].add(format!("left-{i}")).await.unwrap();
        replicas[1].add(format!("right-{i}")).await.unwrap();
    }
    assert_eq!(values(&replicas[0]).await.len(), 6);
    assert_eq!(values(&replicas[1]).await.len(), 6);

    c.set_down(1, false);
    replicas[1]
        .sync()
        .unwrap()
        .sync_with(&TestCluster::peer(0))
        .await
        .unwrap();

    wait_for_all(&replicas, 11).await;
    assert_converged(&replicas).await;

    // Both branches were merged under a single head on the next write.
    replicas[0].add("after".into()).await.unwrap();
    wait_for_all(&replicas, 12).await;
    let heads = replicas[1].log().heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].next.len(), 2);
    c.stop().await;
}

/// A broadcast whose ancestors were missed triggers a full exchange.
#[tokio::test]
async fn test_missed_broadcasts_are_recovered() {
    let c = TestCluster::new(3).await;
    let replicas = c.open_shared::<String>("gossip").await;

    c.set_down(2, true);
    for i in 0..3 {
        replicas[0].add(format!("missed-{i}")).await.unwrap();
    }
    wait_for_all(&replicas[..2], 3).await;
    assert!(values(&replicas[2]).await.is_empty());

    c.set_down(2, false);
    replicas[0].add("seen".into()).await.unwrap();

    wait_for_all(&replicas, 4).await;
    assert_converged(&replicas).await;
    c.stop().await;
}
