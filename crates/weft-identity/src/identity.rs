//! The content-addressed identity record.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use weft_types::content_address;

use crate::error::IdentityError;

/// Signatures binding an identity together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
    /// Signature over `id`, verifiable with the identity's `public_key`.
    pub id: String,
    /// Provider endorsement over `public_key + signatures.id`.
    pub public_key: String,
}

/// Encoded form of an identity; `hash` and `bytes` are derived from it.
#[derive(Serialize)]
struct IdentityRecord<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    public_key: &'a str,
    signatures: &'a Signatures,
}

#[derive(Deserialize)]
struct OwnedIdentityRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    public_key: String,
    signatures: Signatures,
}

/// An immutable signing identity.
///
/// `id` is the provider-level id (for the public-key provider, the hex public
/// key of the provider key). `public_key` is the key entries are signed
/// with. `hash` is the content address of `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Provider-level identifier.
    pub id: String,
    /// Provider type that endorsed this identity.
    pub kind: String,
    /// Hex public key used to sign entries.
    pub public_key: String,
    /// Id and public-key signatures.
    pub signatures: Signatures,
    /// Content address of `bytes`.
    pub hash: String,
    /// Canonical encoding.
    pub bytes: Bytes,
}

impl Identity {
    /// Assemble an identity and derive its encoding and hash.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        public_key: impl Into<String>,
        signatures: Signatures,
    ) -> Result<Self, IdentityError> {
        let id = id.into();
        let kind = kind.into();
        let public_key = public_key.into();

        if id.is_empty() {
            return Err(IdentityError::Validation("identity id is required".into()));
        }
        if kind.is_empty() {
            return Err(IdentityError::Validation("identity type is required".into()));
        }
        if public_key.is_empty() {
            return Err(IdentityError::Validation("public key is required".into()));
        }
        if signatures.id.is_empty() || signatures.public_key.is_empty() {
            return Err(IdentityError::Validation("signatures are required".into()));
        }

        let bytes = Bytes::from(postcard::to_allocvec(&IdentityRecord {
            id: &id,
            kind: &kind,
            public_key: &public_key,
            signatures: &signatures,
        })?);
        let hash = content_address(&bytes);

        Ok(Self {
            id,
            kind,
            public_key,
            signatures,
            hash,
            bytes,
        })
    }

    /// Decode an identity from its canonical bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, IdentityError> {
        let record: OwnedIdentityRecord = postcard::from_bytes(bytes)?;
        let identity = Self::new(
            record.id,
            record.kind,
            record.public_key,
            record.signatures,
        )?;
        if identity.bytes.as_ref() != bytes {
            return Err(IdentityError::Validation(
                "identity bytes are not canonical".into(),
            ));
        }
        Ok(identity)
    }

    /// Whether every field is present and `hash`/`bytes` match the content.
    pub fn is_well_formed(&self) -> bool {
        match Self::new(
            self.id.clone(),
            self.kind.clone(),
            self.public_key.clone(),
            self.signatures.clone(),
        ) {
            Ok(expected) => expected.hash == self.hash && expected.bytes == self.bytes,
            Err(_) => false,
        }
    }
}
