//! Hash function wrapper.

use sha2::{Digest, Sha256};

/// Genesis sentinel: an all-zero digest with the same width as a real
/// SHA-256 output, so the genesis record verifies like any other.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Digest a canonically encoded record against its predecessor's hash.
///
/// Pure function: `hash(encoded || previous_hash)`, rendered as 64 lowercase
/// hex characters. An empty encoding is valid input.
pub fn record_hash(encoded: &[u8], previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded);
    hasher.update(previous_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}
