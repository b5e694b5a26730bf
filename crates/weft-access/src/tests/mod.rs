//! Tests for the access controllers.

mod capability_tests;

use std::sync::Arc;

use weft_identity::{Identities, Identity};
use weft_oplog::{AccessController, Log, LogOptions, Payload};

/// Open `log_id` for `identity`, guarded by `access`.
async fn guarded<T: Payload>(
    identities: &Arc<Identities>,
    identity: &Identity,
    log_id: &str,
    access: Arc<dyn AccessController<T>>,
) -> Log<T> {
    Log::open(
        identities.clone(),
        identity.clone(),
        LogOptions {
            log_id: Some(log_id.into()),
            access: Some(access),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}
