//! Content fingerprinting for cache lookups and repeat-upload detection.
//!
//! Hashes a bounded prefix of the encoded payload instead of the full
//! multi-hundred-KB body — identical prefixes are as good as identical
//! images for this application's risk profile. The digest is truncated to a
//! short hex key: an equality key, not a collision-resistant identifier.

use std::fmt;

use sha2::{Digest, Sha256};

/// How much of the base64 payload feeds the digest.
const SAMPLE_LEN: usize = 1000;

/// Length of the hex key.
const HEX_LEN: usize = 16;

/// Short content-derived identifier for an encoded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-computed key (cache rows round-trip through this).
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a data URI by its payload prefix.
///
/// The part after the first comma is the base64 payload; a string without a
/// comma is hashed as-is so malformed input still yields a stable key.
pub fn fingerprint_data_uri(data_uri: &str) -> Fingerprint {
    let payload = data_uri
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or(data_uri);

    let sample_len = payload.len().min(SAMPLE_LEN);
    let digest = Sha256::digest(&payload.as_bytes()[..sample_len]);

    let mut hex = String::with_capacity(HEX_LEN);
    for byte in digest.iter().take(HEX_LEN / 2) {
        use fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    Fingerprint(hex)
}
