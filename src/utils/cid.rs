//! # CID (Content Identifier)
//!
//! Canonical content identifiers over deterministic DAG-CBOR encoding.

use multihash_codetable::{Code, MultihashDigest};
use serde::Serialize;

use crate::{Result, unexpected};

/// The DAG-CBOR multicodec code.
const DAG_CBOR: u64 = 0x71;

/// The raw-bytes multicodec code, used for data payloads.
const RAW: u64 = 0x55;

/// Compute the CID of any serializable value.
///
/// The value is encoded as deterministic DAG-CBOR, hashed with SHA-256, and
/// rendered as a base32-lower CIDv1.
///
/// # Errors
///
/// Fails when the value cannot be represented as DAG-CBOR.
pub fn from_value<T: Serialize>(value: &T) -> Result<String> {
    let buf =
        serde_ipld_dagcbor::to_vec(value).map_err(|e| unexpected!("issue encoding value: {e}"))?;
    let hash = Code::Sha2_256.digest(&buf);
    Ok(cid::Cid::new_v1(DAG_CBOR, hash).to_string())
}

/// Compute the CID of a raw data payload.
#[must_use]
pub fn from_data(data: &[u8]) -> String {
    let hash = Code::Sha2_256.digest(data);
    cid::Cid::new_v1(RAW, hash).to_string()
}

/// Verify a string parses as a CID.
///
/// # Errors
///
/// Fails when the string is not a valid CID.
pub fn validate(cid: &str) -> Result<()> {
    cid::Cid::try_from(cid).map_err(|e| unexpected!("invalid CID: {e}"))?;
    Ok(())
}
