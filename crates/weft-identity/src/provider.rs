//! Identity providers and the registry that names them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::IdentityError;
use crate::identity::Identity;
use crate::keystore::{KeyStore, public_key_hex, sign_message, verify_message};

/// Endorses identities and checks endorsements.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Type name recorded in identities this provider creates.
    fn kind(&self) -> &str;

    /// Resolve the provider-level id for a caller-supplied name.
    async fn get_id(&self, name: &str) -> Result<String, IdentityError>;

    /// Endorse `data` on behalf of `name`.
    async fn sign_identity(&self, data: &str, name: &str) -> Result<String, IdentityError>;

    /// Check the endorsement carried in `identity.signatures.public_key`.
    async fn verify_identity(&self, identity: &Identity) -> Result<bool, IdentityError>;
}

/// Provider whose ids are hex ed25519 public keys held in a [`KeyStore`].
///
/// The endorsement is a signature by the id's own key over
/// `public_key + signatures.id`, so anyone can verify it from the identity
/// alone.
pub struct PublicKeyProvider {
    keystore: Arc<KeyStore>,
}

impl PublicKeyProvider {
    /// Type name of identities created by this provider.
    pub const KIND: &'static str = "publickey";

    /// Provider backed by `keystore`.
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self { keystore }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for PublicKeyProvider {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn get_id(&self, name: &str) -> Result<String, IdentityError> {
        if name.is_empty() {
            return Err(IdentityError::Validation("identity name is required".into()));
        }
        let key = self.keystore.get_or_create_key(name).await?;
        Ok(public_key_hex(&key))
    }

    async fn sign_identity(&self, data: &str, name: &str) -> Result<String, IdentityError> {
        let key = self
            .keystore
            .get_key(name)
            .await?
            .ok_or_else(|| IdentityError::KeyNotFound(name.to_string()))?;
        Ok(sign_message(&key, data.as_bytes()))
    }

    async fn verify_identity(&self, identity: &Identity) -> Result<bool, IdentityError> {
        let endorsed = format!("{}{}", identity.public_key, identity.signatures.id);
        Ok(verify_message(
            &identity.signatures.public_key,
            &identity.id,
            endorsed.as_bytes(),
        ))
    }
}

/// Explicit set of identity providers, keyed by type name.
///
/// Built once at startup and handed to [`Identities`](crate::Identities).
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the public-key provider over `keystore`.
    pub fn with_public_key(keystore: Arc<KeyStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PublicKeyProvider::new(keystore)));
        registry
    }

    /// Add a provider, replacing any provider of the same type.
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.insert(provider.kind().to_string(), provider)
    }

    /// Provider for `kind`.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(kind).cloned()
    }

    /// Registered type names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.providers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
