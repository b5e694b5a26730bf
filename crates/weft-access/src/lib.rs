//! Access controllers for weft logs.
//!
//! - [`AllowListAccessController`]: a fixed set of writer identity ids,
//!   persisted as a content-addressed manifest (`"*"` admits anyone).
//! - [`CapabilityAccessController`]: capabilities (`write`, `admin`, ...)
//!   held in a nested log that is itself replicated, so grants and revokes
//!   propagate like any other write.
//!
//! Both resolve the signer's identity from the entry, check that it signed
//! with the identity's key, and verify the identity before admitting it.

mod allow_list;
mod capability;
mod error;

#[cfg(test)]
mod tests;

pub use allow_list::AllowListAccessController;
pub use capability::{AclOp, CapabilityAccessController};
pub use error::AccessError;

use weft_identity::{Identities, Identity};
use weft_oplog::{Entry, OplogError, Payload};

/// Wildcard write id admitting every identity.
pub const ANY: &str = "*";

/// Resolve the identity that signed `entry`, if it is known and consistent
/// with the entry's signing key.
async fn signer<T: Payload>(
    identities: &Identities,
    entry: &Entry<T>,
) -> Result<Option<Identity>, OplogError> {
    let Some(identity) = identities.get_identity(&entry.identity).await? else {
        tracing::debug!(identity = %entry.identity, "unknown signer identity");
        return Ok(None);
    };
    if identity.public_key != entry.key {
        tracing::debug!(identity = %entry.identity, "entry key does not match identity");
        return Ok(None);
    }
    Ok(Some(identity))
}
