//! Capability-guarded logs.

use weft_oplog::{AccessController, OplogError};

use super::helpers::{memory_node, offline_nodes, values};
use crate::error::NodeError;
use crate::node::{AccessControllerType, OpenOptions};

fn capability(write: &[&str]) -> OpenOptions {
    OpenOptions {
        access: AccessControllerType::Capability {
            write: write.iter().map(|w| w.to_string()).collect(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_capability_log_is_nested() {
    let node = memory_node("userA").await;
    let replica = node.open::<String>("guarded", capability(&[])).await.unwrap();

    let nested = replica.access_replica().unwrap();
    assert_eq!(nested.name(), "guarded/_access");
    assert_eq!(nested.manifest().kind, "capability");
    assert_eq!(
        replica.access().address(),
        format!("/capability{}", nested.address())
    );
    assert!(replica.manifest().access_controller.starts_with("/capability/weft/"));
    assert_eq!(replica.access().kind(), "capability");
}

#[tokio::test]
async fn test_admin_can_write() {
    let node = memory_node("userA").await;
    let replica = node.open::<String>("guarded", capability(&[])).await.unwrap();
    let me = node.identity().id.clone();

    let capabilities = replica.capabilities().unwrap();
    let all = capabilities.capabilities().await.unwrap();
    assert!(all["admin"].contains(&me));
    assert!(capabilities.has_capability("admin", &me).await.unwrap());
    assert!(!capabilities.has_capability("write", &me).await.unwrap());

    replica.add("by admin".into()).await.unwrap();
    assert_eq!(values(&replica).await, vec!["by admin"]);
}

#[tokio::test]
async fn test_grant_and_revoke() {
    let node = memory_node("userA").await;
    let replica = node.open::<String>("guarded", capability(&[])).await.unwrap();
    let capabilities = replica.capabilities().unwrap();

    replica.grant("write", "alice").await.unwrap();
    replica.grant("write", "bob").await.unwrap();
    assert!(capabilities.has_capability("write", "alice").await.unwrap());
    assert_eq!(capabilities.get("write").await.unwrap().len(), 2);

    replica.revoke("write", "alice").await.unwrap();
    assert!(!capabilities.has_capability("write", "alice").await.unwrap());
    replica.revoke("write", "bob").await.unwrap();
    assert!(!capabilities.capabilities().await.unwrap().contains_key("write"));

    // Grants are entries of the nested log.
    let nested = replica.access_replica().unwrap();
    assert_eq!(values(nested).await.len(), 4);
}

#[tokio::test]
async fn test_non_holder_is_denied() {
    let nodes = offline_nodes(&["userA", "userB"]).await;
    let owned = nodes[0]
        .open::<String>("guarded", capability(&[]))
        .await
        .unwrap();
    let foreign = nodes[1]
        .open::<String>(&owned.address().to_string(), OpenOptions::default())
        .await
        .unwrap();

    assert!(foreign.capabilities().is_some());
    let err = foreign.add("intruder".into()).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Oplog(OplogError::Authorization(_))
    ));

    // Only the nested log's writers may grant.
    let err = foreign.grant("write", "userB").await.unwrap_err();
    assert!(matches!(err, NodeError::Access(_)));
}
