//! Persistent store of ed25519 signing keys.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use tracing::debug;
use weft_store::{ComposedStorage, DiskStorage, LruStorage, MemoryStorage, Storage};

use crate::error::IdentityError;

/// Keys cached in front of the persistent layer.
const KEY_CACHE_SIZE: usize = 100;

fn storage_key(id: &str) -> String {
    format!("private_{id}")
}

/// Signing keys keyed by identity id.
///
/// Each key's 32 secret bytes live under `private_<id>` in the backing
/// [`Storage`].
pub struct KeyStore {
    storage: Arc<dyn Storage>,
}

impl KeyStore {
    /// Key store over an arbitrary storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Key store held entirely in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(ComposedStorage::new(
            Arc::new(LruStorage::new(KEY_CACHE_SIZE)),
            Arc::new(MemoryStorage::new()),
        )))
    }

    /// Key store persisted on disk at `path`, with an LRU in front.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        Ok(Self::new(Arc::new(ComposedStorage::new(
            Arc::new(LruStorage::new(KEY_CACHE_SIZE)),
            Arc::new(DiskStorage::open(path)?),
        ))))
    }

    /// Whether a key is stored for `id`.
    pub async fn has_key(&self, id: &str) -> Result<bool, IdentityError> {
        Ok(self.storage.get(&storage_key(id)).await?.is_some())
    }

    /// Store `key` for `id`, replacing any existing key.
    pub async fn add_key(&self, id: &str, key: &SigningKey) -> Result<(), IdentityError> {
        self.storage
            .put(&storage_key(id), Bytes::copy_from_slice(&key.to_bytes()))
            .await?;
        Ok(())
    }

    /// Generate and store a fresh key for `id`.
    ///
    /// Fails with [`IdentityError::AlreadyExists`] if `id` already has one.
    pub async fn create_key(&self, id: &str) -> Result<SigningKey, IdentityError> {
        if self.has_key(id).await? {
            return Err(IdentityError::AlreadyExists(id.to_string()));
        }
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let key = SigningKey::from_bytes(&secret);
        self.add_key(id, &key).await?;
        debug!(id, "created signing key");
        Ok(key)
    }

    /// Load the key for `id`.
    pub async fn get_key(&self, id: &str) -> Result<Option<SigningKey>, IdentityError> {
        let Some(bytes) = self.storage.get(&storage_key(id)).await? else {
            return Ok(None);
        };
        let secret: [u8; 32] = bytes.as_ref().try_into().map_err(|_| {
            IdentityError::Validation(format!("stored key for {id} is {} bytes", bytes.len()))
        })?;
        Ok(Some(SigningKey::from_bytes(&secret)))
    }

    /// Load the key for `id`, creating it if absent.
    pub async fn get_or_create_key(&self, id: &str) -> Result<SigningKey, IdentityError> {
        match self.get_key(id).await? {
            Some(key) => Ok(key),
            None => self.create_key(id).await,
        }
    }

    /// Delete the key for `id`.
    pub async fn remove_key(&self, id: &str) -> Result<(), IdentityError> {
        self.storage.del(&storage_key(id)).await?;
        Ok(())
    }

    /// Delete every key.
    pub async fn clear(&self) -> Result<(), IdentityError> {
        self.storage.clear().await?;
        Ok(())
    }

    /// Close the backing storage.
    pub async fn close(&self) -> Result<(), IdentityError> {
        self.storage.close().await?;
        Ok(())
    }
}

/// Hex-encoded public key of `key`.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

/// Sign `data`, returning the hex-encoded signature.
pub fn sign_message(key: &SigningKey, data: &[u8]) -> String {
    hex::encode(key.sign(data).to_bytes())
}

/// Verify a hex signature over `data` against a hex public key.
///
/// Malformed inputs verify as `false`.
pub fn verify_message(signature: &str, public_key: &str, data: &[u8]) -> bool {
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };
    let Ok(signature) = <[u8; 64]>::try_from(signature.as_slice()) else {
        return false;
    };
    let Ok(public_key) = hex::decode(public_key) else {
        return false;
    };
    let Ok(public_key) = <[u8; 32]>::try_from(public_key.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    verifying_key
        .verify(data, &Signature::from_bytes(&signature))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_key() {
        let store = KeyStore::in_memory();
        assert!(!store.has_key("userA").await.unwrap());

        let key = store.create_key("userA").await.unwrap();
        assert!(store.has_key("userA").await.unwrap());
        let loaded = store.get_key("userA").await.unwrap().unwrap();
        assert_eq!(key.to_bytes(), loaded.to_bytes());
    }

    #[tokio::test]
    async fn test_create_existing_key_fails() {
        let store = KeyStore::in_memory();
        store.create_key("userA").await.unwrap();
        assert!(matches!(
            store.create_key("userA").await,
            Err(IdentityError::AlreadyExists(id)) if id == "userA"
        ));
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = KeyStore::in_memory();
        let a = store.get_or_create_key("x").await.unwrap();
        let b = store.get_or_create_key("x").await.unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[tokio::test]
    async fn test_namespaced_layout() {
        let backing = Arc::new(MemoryStorage::new());
        let store = KeyStore::new(backing.clone());
        let key = SigningKey::from_bytes(&[3u8; 32]);
        store.add_key("userA", &key).await.unwrap();

        let raw = backing.get("private_userA").await.unwrap().unwrap();
        assert_eq!(raw.as_ref(), &[3u8; 32]);
    }

    #[tokio::test]
    async fn test_corrupt_key_is_rejected() {
        let backing = Arc::new(MemoryStorage::new());
        backing
            .put("private_bad", Bytes::from_static(b"short"))
            .await
            .unwrap();
        let store = KeyStore::new(backing);
        assert!(matches!(
            store.get_key("bad").await,
            Err(IdentityError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = KeyStore::in_memory();
        store.create_key("a").await.unwrap();
        store.create_key("b").await.unwrap();
        store.remove_key("a").await.unwrap();
        assert!(!store.has_key("a").await.unwrap());
        store.clear().await.unwrap();
        assert!(!store.has_key("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = KeyStore::open(dir.path()).unwrap();
            let key = store.create_key("durable").await.unwrap();
            store.close().await.unwrap();
            key
        };
        let store = KeyStore::open(dir.path()).unwrap();
        let loaded = store.get_key("durable").await.unwrap().unwrap();
        assert_eq!(key.to_bytes(), loaded.to_bytes());
    }

    #[test]
    fn test_sign_verify_message() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let public_key = public_key_hex(&key);
        let signature = sign_message(&key, b"hello");

        assert!(verify_message(&signature, &public_key, b"hello"));
        assert!(!verify_message(&signature, &public_key, b"hellO"));
        assert!(!verify_message("zz", &public_key, b"hello"));
        assert!(!verify_message(&signature, "abcd", b"hello"));

        let other = public_key_hex(&SigningKey::from_bytes(&[8u8; 32]));
        assert!(!verify_message(&signature, &other, b"hello"));
    }
}
