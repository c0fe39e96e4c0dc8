//! Membership filter
//!
//! A fixed-size bloom filter answering "definitely absent" vs "possibly
//! present" for content keys. It gates the backing-store tier: a lookup
//! whose key the filter has never seen returns "not cached" without a
//! network round trip.
//!
//! Bits are only ever set, never cleared, so concurrent insert/query needs
//! no locking: each bit lives in an `AtomicU64` word updated with
//! `fetch_or`. Consequence: no false negatives for inserted keys, and the
//! false-positive rate can only rise over the filter's lifetime relative to
//! its design capacity.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::fingerprint::ContentKey;

/// Probabilistic membership set over content keys.
///
/// Sized from the standard optimal formulas for `expected_entries` (n) and
/// `false_positive_rate` (p):
///
/// ```text
/// m = ceil(-n * ln(p) / (ln 2)^2)     bits
/// k = max(1, round((m / n) * ln 2))   hash functions
/// ```
///
/// The k probe positions are derived by double hashing two lanes of the
/// key's digest: `pos_i = (h1 + i * h2) mod m`.
pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Build a filter for `expected_entries` insertions at the target
    /// false-positive rate.
    ///
    /// Callers validate the parameters (see `CacheConfig::validate`);
    /// `false_positive_rate` must be in (0, 1) and `expected_entries` > 0.
    pub fn new(expected_entries: usize, false_positive_rate: f64) -> Self {
        let n = expected_entries as f64;
        let ln2 = std::f64::consts::LN_2;

        let m = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let m = m.max(64);
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u32;

        let words = m.div_ceil(64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));

        Self {
            bits,
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Number of bits (m).
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions (k).
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Insert a key. Sets k bits; never fails, never blocks.
    pub fn insert(&self, key: &ContentKey) {
        let (h1, h2) = key.hash_pair();
        for i in 0..self.num_hashes {
            let pos = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            let word = (pos / 64) as usize;
            let mask = 1u64 << (pos % 64);
            self.bits[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    /// Membership query.
    ///
    /// `false` is definitive: the key was never inserted. `true` may be a
    /// false positive, at a long-run rate bounded by the configured p while
    /// insertions stay near the design capacity.
    pub fn might_contain(&self, key: &ContentKey) -> bool {
        let (h1, h2) = key.hash_pair();
        for i in 0..self.num_hashes {
            let pos = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            let word = (pos / 64) as usize;
            let mask = 1u64 << (pos % 64);
            if self.bits[word].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }
}
