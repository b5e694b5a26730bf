//! Content addressing.
//!
//! Every stored block (entries, identities, manifests) is keyed by a CIDv1
//! string: raw codec, sha2-256 multihash, base58btc multibase.

use cid::multihash::Multihash;
use cid::{Cid, Version};
use multibase::Base;
use sha2::{Digest, Sha256};

/// Multicodec for raw bytes.
pub const RAW_CODEC: u64 = 0x55;

/// Multihash code for sha2-256.
pub const SHA2_256: u64 = 0x12;

/// The CID of `data`.
pub fn content_id(data: &[u8]) -> Cid {
    let digest = Sha256::digest(data);
    let Ok(hash) = Multihash::<64>::wrap(SHA2_256, &digest) else {
        unreachable!("a 32 byte digest fits a 64 byte multihash");
    };
    Cid::new_v1(RAW_CODEC, hash)
}

/// Compute the content address of `data`.
pub fn content_address(data: &[u8]) -> String {
    multibase::encode(Base::Base58Btc, content_id(data).to_bytes())
}

/// Parse a content address, returning `None` if it is not a valid CID.
pub fn parse_content_address(s: &str) -> Option<Cid> {
    Cid::try_from(s).ok()
}

/// Whether `s` is a CIDv1 string such as [`content_address`] produces.
pub fn is_content_address(s: &str) -> bool {
    parse_content_address(s).is_some_and(|cid| cid.version() == Version::V1)
}
