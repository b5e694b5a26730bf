use std::sync::Arc;

use weft_identity::{Identities, Identity};
use weft_oplog::{AccessController, AppendOptions, Log, OplogError};
use weft_store::MemoryStorage;

use super::guarded;
use crate::{AccessError, AclOp, AllowListAccessController, CapabilityAccessController};

/// Capability controller whose nested log is administered by `admin`.
async fn capability_controller(
    identities: &Arc<Identities>,
    admin: &Identity,
) -> Arc<CapabilityAccessController> {
    let storage = MemoryStorage::new();
    let acl_access = Arc::new(
        AllowListAccessController::create(identities.clone(), &storage, vec![admin.id.clone()])
            .await
            .unwrap(),
    );
    let acl_log: Log<AclOp> = guarded::<AclOp>(identities, admin, "acl", acl_access).await;
    Arc::new(CapabilityAccessController::new(Arc::new(acl_log)))
}

#[tokio::test]
async fn test_grant_then_append_succeeds() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let b = identities.create_identity("B").await.unwrap();
    let access = capability_controller(&identities, &a).await;

    let log_b = guarded::<String>(&identities, &b, "log", access.clone()).await;
    let err = log_b
        .append("before".into(), AppendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OplogError::Authorization(_)));

    access.grant("write", &b.id).await.unwrap();
    assert!(access.has_capability("write", &b.id).await.unwrap());
    log_b
        .append("after".into(), AppendOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_nested_writers_are_admins() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let access = capability_controller(&identities, &a).await;

    let capabilities = access.capabilities().await.unwrap();
    assert!(capabilities["admin"].contains(&a.id));
    assert!(access.has_capability("admin", &a.id).await.unwrap());

    // Admins may write to the governed log without an explicit grant.
    let log_a = guarded::<String>(&identities, &a, "log", access).await;
    log_a.append("x".into(), AppendOptions::default()).await.unwrap();
}

#[tokio::test]
async fn test_revoke_removes_capability() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let b = identities.create_identity("B").await.unwrap();
    let c = identities.create_identity("C").await.unwrap();
    let access = capability_controller(&identities, &a).await;

    access.grant("write", &b.id).await.unwrap();
    access.grant("write", &c.id).await.unwrap();
    assert_eq!(access.get("write").await.unwrap().len(), 2);

    access.revoke("write", &b.id).await.unwrap();
    let holders = access.get("write").await.unwrap();
    assert!(!holders.contains(&b.id));
    assert!(holders.contains(&c.id));

    access.revoke("write", &c.id).await.unwrap();
    assert!(access.get("write").await.unwrap().is_empty());
    assert!(!access.capabilities().await.unwrap().contains_key("write"));

    let log_b = guarded::<String>(&identities, &b, "log", access).await;
    assert!(matches!(
        log_b.append("x".into(), AppendOptions::default()).await,
        Err(OplogError::Authorization(_))
    ));
}

#[tokio::test]
async fn test_regrant_after_delete() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let access = capability_controller(&identities, &a).await;

    access.grant("read", "someone").await.unwrap();
    access.revoke("read", "someone").await.unwrap();
    access.grant("read", "other").await.unwrap();
    assert_eq!(
        access.get("read").await.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["other".to_string()]
    );
}

#[tokio::test]
async fn test_only_admins_can_grant() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let b = identities.create_identity("B").await.unwrap();
    let access = capability_controller(&identities, &a).await;

    // B opens the same capability log under its own identity.
    let acl_for_b: Log<AclOp> = Log::open(
        identities.clone(),
        b.clone(),
        weft_oplog::LogOptions {
            log_id: Some("acl".into()),
            access: Some(access.log().access().clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let b_view = CapabilityAccessController::new(Arc::new(acl_for_b));
    let err = b_view.grant("write", &b.id).await.unwrap_err();
    assert!(matches!(
        err,
        AccessError::Oplog(OplogError::Authorization(_))
    ));
}

#[tokio::test]
async fn test_wildcard_write_capability() {
    let identities = Arc::new(Identities::in_memory());
    let a = identities.create_identity("A").await.unwrap();
    let b = identities.create_identity("B").await.unwrap();
    let access = capability_controller(&identities, &a).await;
    access.grant("write", "*").await.unwrap();

    assert!(access.has_capability("write", &b.id).await.unwrap());
    assert_eq!(AccessController::<String>::kind(access.as_ref()), "capability");
    assert!(AccessController::<String>::address(access.as_ref()).starts_with("/capability/"));
}
