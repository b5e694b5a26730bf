//! Identity creation, resolution and verification.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use ::lru::LruCache;
use bytes::Bytes;
use tracing::{debug, warn};
use weft_store::{MemoryStorage, Storage};
use weft_types::DEFAULT_CACHE_SIZE;

use crate::error::IdentityError;
use crate::identity::{Identity, Signatures};
use crate::keystore::{KeyStore, public_key_hex, sign_message, verify_message};
use crate::provider::{ProviderRegistry, PublicKeyProvider};

/// Creates, stores, resolves and verifies identities.
///
/// Identities are stored content-addressed in `storage`, so any replica
/// holding the bytes can resolve a writer by its identity hash. Successful
/// verifications are memoized in a bounded LRU keyed by the id signature;
/// [`invalidate`](Self::invalidate) and [`clear_cache`](Self::clear_cache)
/// drop memoized results, e.g. after a key is revoked.
pub struct Identities {
    keystore: Arc<KeyStore>,
    storage: Arc<dyn Storage>,
    providers: ProviderRegistry,
    verified: Mutex<LruCache<String, Identity>>,
}

impl Identities {
    /// Identities over `keystore` and `storage`, with the public-key
    /// provider registered.
    pub fn new(keystore: Arc<KeyStore>, storage: Arc<dyn Storage>) -> Self {
        let providers = ProviderRegistry::with_public_key(keystore.clone());
        Self {
            keystore,
            storage,
            providers,
            verified: Mutex::new(LruCache::new(cache_capacity(DEFAULT_CACHE_SIZE))),
        }
    }

    /// Identities held entirely in memory.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(KeyStore::in_memory()),
            Arc::new(MemoryStorage::new()),
        )
    }

    /// Replace the provider registry.
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Bound the verified-identity cache to `size` entries.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.verified = Mutex::new(LruCache::new(cache_capacity(size)));
        self
    }

    /// The key store signing keys are held in.
    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// The registered providers.
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Create (or recreate) the identity for `name` with the public-key
    /// provider.
    pub async fn create_identity(&self, name: &str) -> Result<Identity, IdentityError> {
        self.create_identity_with(name, PublicKeyProvider::KIND).await
    }

    /// Create the identity for `name` with the provider registered as `kind`.
    ///
    /// The signing key is obtained from (or created in) the key store under
    /// the provider id, `id` is signed with it, and the provider endorses
    /// `public_key + signatures.id`. The identity is persisted before it is
    /// returned.
    pub async fn create_identity_with(
        &self,
        name: &str,
        kind: &str,
    ) -> Result<Identity, IdentityError> {
        let provider = self
            .providers
            .get(kind)
            .ok_or_else(|| IdentityError::UnknownProvider(kind.to_string()))?;

        let id = provider.get_id(name).await?;
        let key = self.keystore.get_or_create_key(&id).await?;
        let public_key = public_key_hex(&key);
        let id_signature = sign_message(&key, id.as_bytes());
        let public_key_signature = provider
            .sign_identity(&format!("{public_key}{id_signature}"), name)
            .await?;

        let identity = Identity::new(
            id,
            kind,
            public_key,
            Signatures {
                id: id_signature,
                public_key: public_key_signature,
            },
        )?;
        self.storage
            .put(&identity.hash, identity.bytes.clone())
            .await?;
        debug!(name, kind, hash = %identity.hash, "created identity");
        Ok(identity)
    }

    /// Verify `identity`. Never errors: anything malformed or unverifiable
    /// is `false`.
    pub async fn verify_identity(&self, identity: &Identity) -> bool {
        if !identity.is_well_formed() {
            return false;
        }
        if !verify_message(
            &identity.signatures.id,
            &identity.public_key,
            identity.id.as_bytes(),
        ) {
            return false;
        }

        let cached = self
            .verified
            .lock()
            .expect("lock poisoned")
            .get(&identity.signatures.id)
            .cloned();
        if let Some(cached) = cached {
            return &cached == identity;
        }

        let Some(provider) = self.providers.get(&identity.kind) else {
            return false;
        };
        match provider.verify_identity(identity).await {
            Ok(true) => {
                self.verified
                    .lock()
                    .expect("lock poisoned")
                    .put(identity.signatures.id.clone(), identity.clone());
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(hash = %identity.hash, error = %e, "identity provider failed to verify");
                false
            }
        }
    }

    /// Resolve an identity by its hash.
    pub async fn get_identity(&self, hash: &str) -> Result<Option<Identity>, IdentityError> {
        match self.storage.get(hash).await? {
            Some(bytes) => {
                let identity = Identity::decode(&bytes)?;
                if identity.hash != hash {
                    return Err(IdentityError::Validation(format!(
                        "identity stored under {hash} hashes to {}",
                        identity.hash
                    )));
                }
                Ok(Some(identity))
            }
            None => Ok(None),
        }
    }

    /// Canonical bytes of the identity stored under `hash`.
    pub async fn identity_bytes(&self, hash: &str) -> Result<Option<Bytes>, IdentityError> {
        Ok(self.storage.get(hash).await?)
    }

    /// Store an identity learned from a peer.
    ///
    /// Only the encoding is checked; trust comes from
    /// [`verify_identity`](Self::verify_identity) at use time.
    pub async fn import(&self, bytes: &[u8]) -> Result<Identity, IdentityError> {
        let identity = Identity::decode(bytes)?;
        if self.storage.get(&identity.hash).await?.is_none() {
            self.storage
                .put(&identity.hash, identity.bytes.clone())
                .await?;
            debug!(hash = %identity.hash, "imported identity");
        }
        Ok(identity)
    }

    /// Sign `data` with the key of `identity`.
    pub async fn sign(&self, identity: &Identity, data: &[u8]) -> Result<String, IdentityError> {
        let key = self
            .keystore
            .get_key(&identity.id)
            .await?
            .ok_or_else(|| IdentityError::KeyNotFound(identity.id.clone()))?;
        Ok(sign_message(&key, data))
    }

    /// Verify a hex signature over `data` against a hex public key.
    pub fn verify(&self, signature: &str, public_key: &str, data: &[u8]) -> bool {
        verify_message(signature, public_key, data)
    }

    /// Forget any memoized verification of `identity`.
    pub fn invalidate(&self, identity: &Identity) {
        self.verified
            .lock()
            .expect("lock poisoned")
            .pop(&identity.signatures.id);
    }

    /// Forget every memoized verification.
    pub fn clear_cache(&self) {
        self.verified.lock().expect("lock poisoned").clear();
    }

    /// Number of memoized verifications.
    pub fn cached_len(&self) -> usize {
        self.verified.lock().expect("lock poisoned").len()
    }

    /// Close the identity storage and the key store.
    pub async fn close(&self) -> Result<(), IdentityError> {
        self.storage.close().await?;
        self.keystore.close().await
    }
}

fn cache_capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}
