//! Signed, content-addressed log entries.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use weft_identity::{Identities, Identity, verify_message};
use weft_types::{Clock, ENTRY_VERSION, content_address, is_content_address};

use crate::error::OplogError;

/// Bounds every payload type carried by a log.
pub trait Payload:
    Serialize + DeserializeOwned + Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
}

impl<T> Payload for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
}

/// A single node of the log DAG.
///
/// `hash` covers only `(id, payload, next, refs, clock, v)`, so it does not
/// depend on who signed the entry. `bytes` is the full signed encoding, the
/// form stored and sent to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    /// Id of the log this entry belongs to.
    pub id: String,
    /// Application payload.
    pub payload: T,
    /// Hashes of the heads at creation time.
    pub next: Vec<String>,
    /// Skip-list hashes of older ancestors.
    pub refs: Vec<String>,
    /// Lamport clock of the write.
    pub clock: Clock,
    /// Entry format version.
    pub v: u32,
    /// Hex public key of the signer.
    pub key: String,
    /// Content address of the signer's identity.
    pub identity: String,
    /// Hex signature over the unsigned encoding.
    pub sig: String,
    /// Content address of the unsigned encoding.
    pub hash: String,
    /// Signed encoding.
    pub bytes: Bytes,
}

/// Hashable content of an [`Entry`] (excludes signer fields, `hash` and `bytes`).
#[derive(Serialize)]
struct HashableContent<'a, T> {
    id: &'a str,
    payload: &'a T,
    next: &'a [String],
    refs: &'a [String],
    clock: &'a Clock,
    v: u32,
}

#[derive(Serialize)]
struct SignedContent<'a, T> {
    id: &'a str,
    payload: &'a T,
    next: &'a [String],
    refs: &'a [String],
    clock: &'a Clock,
    v: u32,
    key: &'a str,
    identity: &'a str,
    sig: &'a str,
}

#[derive(Deserialize)]
struct WireEntry<T> {
    id: String,
    payload: T,
    next: Vec<String>,
    refs: Vec<String>,
    clock: Clock,
    v: u32,
    key: String,
    identity: String,
    sig: String,
}

impl<T: Payload> Entry<T> {
    /// Create and sign a new entry.
    ///
    /// The clock defaults to time 0 for the identity's public key. Fails
    /// with [`OplogError::Validation`] if `log_id` is empty or a parent hash
    /// is not a content address.
    pub async fn create(
        identities: &Identities,
        identity: &Identity,
        log_id: &str,
        payload: T,
        clock: Option<Clock>,
        next: Vec<String>,
        refs: Vec<String>,
    ) -> Result<Self, OplogError> {
        if log_id.is_empty() {
            return Err(OplogError::Validation("log id is required".into()));
        }
        if identity.hash.is_empty() || identity.public_key.is_empty() {
            return Err(OplogError::Validation("identity is required".into()));
        }
        if let Some(bad) = next.iter().chain(&refs).find(|h| !is_content_address(h)) {
            return Err(OplogError::Validation(format!(
                "parent {bad} is not a content address"
            )));
        }

        let clock = clock.unwrap_or_else(|| Clock::new(identity.public_key.clone(), 0));
        let unsigned = encode_unsigned(log_id, &payload, &next, &refs, &clock, ENTRY_VERSION)?;
        let hash = content_address(&unsigned);
        let sig = identities.sign(identity, &unsigned).await?;

        let bytes = postcard::to_allocvec(&SignedContent {
            id: log_id,
            payload: &payload,
            next: &next,
            refs: &refs,
            clock: &clock,
            v: ENTRY_VERSION,
            key: &identity.public_key,
            identity: &identity.hash,
            sig: &sig,
        })?;

        Ok(Self {
            id: log_id.to_string(),
            payload,
            next,
            refs,
            clock,
            v: ENTRY_VERSION,
            key: identity.public_key.clone(),
            identity: identity.hash.clone(),
            sig,
            hash,
            bytes: Bytes::from(bytes),
        })
    }

    /// Decode a signed entry and recompute its hash.
    ///
    /// Does not check the signature; call [`Entry::verify`] for that.
    pub fn decode(bytes: &[u8]) -> Result<Self, OplogError> {
        let wire: WireEntry<T> = postcard::from_bytes(bytes)?;
        let hash = Self::compute_hash(
            &wire.id,
            &wire.payload,
            &wire.next,
            &wire.refs,
            &wire.clock,
            wire.v,
        )?;
        Ok(Self {
            id: wire.id,
            payload: wire.payload,
            next: wire.next,
            refs: wire.refs,
            clock: wire.clock,
            v: wire.v,
            key: wire.key,
            identity: wire.identity,
            sig: wire.sig,
            hash,
            bytes: Bytes::copy_from_slice(bytes),
        })
    }

    /// Compute the content address of the unsigned fields.
    pub fn compute_hash(
        id: &str,
        payload: &T,
        next: &[String],
        refs: &[String],
        clock: &Clock,
        v: u32,
    ) -> Result<String, OplogError> {
        let unsigned = encode_unsigned(id, payload, next, refs, clock, v)?;
        Ok(content_address(&unsigned))
    }

    /// Structural checks: required fields present, parents well-formed.
    pub fn validate(&self) -> Result<(), OplogError> {
        if self.id.is_empty() {
            return Err(OplogError::Validation("entry has no log id".into()));
        }
        if self.key.is_empty() || self.sig.is_empty() || self.identity.is_empty() {
            return Err(OplogError::Validation(format!(
                "entry {} is missing signer fields",
                self.hash
            )));
        }
        if self.v != ENTRY_VERSION {
            return Err(OplogError::Validation(format!(
                "entry {} has unsupported version {}",
                self.hash, self.v
            )));
        }
        if self.clock.time == u64::MAX {
            return Err(OplogError::Validation(format!(
                "entry {} has an exhausted clock",
                self.hash
            )));
        }
        if let Some(bad) = self.next.iter().chain(&self.refs).find(|h| !is_content_address(h)) {
            return Err(OplogError::Validation(format!(
                "entry {} has malformed parent {bad}",
                self.hash
            )));
        }
        Ok(())
    }

    /// Validate the entry and check its signature against `key`.
    pub fn verify(&self) -> Result<(), OplogError> {
        self.validate()?;

        let unsigned = encode_unsigned(
            &self.id,
            &self.payload,
            &self.next,
            &self.refs,
            &self.clock,
            self.v,
        )?;
        if content_address(&unsigned) != self.hash {
            return Err(OplogError::Validation(format!(
                "entry {} does not match its content",
                self.hash
            )));
        }
        if !verify_message(&self.sig, &self.key, &unsigned) {
            return Err(OplogError::Signature(format!(
                "entry {} signed by {}",
                self.hash, self.key
            )));
        }
        Ok(())
    }

    /// Whether `self` is an immediate parent of `other`.
    pub fn is_parent_of(&self, other: &Entry<T>) -> bool {
        other.next.contains(&self.hash)
    }
}

fn encode_unsigned<T: Serialize>(
    id: &str,
    payload: &T,
    next: &[String],
    refs: &[String],
    clock: &Clock,
    v: u32,
) -> Result<Vec<u8>, OplogError> {
    Ok(postcard::to_allocvec(&HashableContent {
        id,
        payload,
        next,
        refs,
        clock,
        v,
    })?)
}
