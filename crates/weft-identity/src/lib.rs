//! Signing identities for weft.
//!
//! - [`KeyStore`]: ed25519 signing keys persisted under `private_<id>`.
//! - [`Identity`]: an immutable, content-addressed binding of an id to a
//!   public key, endorsed by an [`IdentityProvider`].
//! - [`Identities`]: creates, stores, resolves and verifies identities, with a
//!   bounded cache of verified identities keyed by their id signature.
//! - [`ProviderRegistry`]: the explicit set of providers an [`Identities`]
//!   instance may create or verify identities with.

mod error;
mod identities;
mod identity;
mod keystore;
mod provider;

pub use error::IdentityError;
pub use identities::Identities;
pub use identity::{Identity, Signatures};
pub use keystore::{KeyStore, public_key_hex, sign_message, verify_message};
pub use provider::{IdentityProvider, ProviderRegistry, PublicKeyProvider};
