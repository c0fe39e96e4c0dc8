//! Prompt fingerprinting
//!
//! Maps an arbitrary prompt string to a fixed-width content key (SHA-256
//! digest). The key is what every cache tier is keyed by: the local LRU and
//! the membership filter use it directly, the backing store uses its hex
//! rendering under a namespace prefix.

use sha2::{Digest, Sha256};

/// Fixed-width digest of a prompt, used as the cache lookup key.
///
/// Equality is byte equality. Computed fresh per call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Hex rendering, used to build the namespaced backing-store key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Two independent 64-bit lanes of the digest, for double hashing in
    /// the membership filter. The second lane is forced odd so the probe
    /// stride never degenerates to zero.
    pub(crate) fn hash_pair(&self) -> (u64, u64) {
        let h1 = u64::from_le_bytes(self.0[0..8].try_into().unwrap());
        let h2 = u64::from_le_bytes(self.0[8..16].try_into().unwrap());
        (h1, h2 | 1)
    }
}

/// Compute the content key for a prompt.
///
/// Pure and deterministic: identical text always yields an identical key.
/// Any string is valid input, including the empty string.
pub fn fingerprint(prompt: &str) -> ContentKey {
    let digest = Sha256::digest(prompt.as_bytes());
    ContentKey(digest.into())
}
