//! Cache configuration

use std::time::Duration;

use crate::CacheError;

/// Configuration for the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expected number of distinct cached prompts (membership-filter
    /// capacity n). The false-positive guarantee holds while insertions
    /// stay near this count.
    pub expected_entries: usize,
    /// Target membership-filter false-positive rate p, in (0, 1).
    pub false_positive_rate: f64,
    /// Maximum number of entries in the in-process LRU tier.
    pub local_capacity: usize,
    /// TTL applied to backing-store writes when the caller gives none.
    pub default_ttl: Duration,
    /// Namespace prefix for backing-store keys, so cached responses never
    /// collide with unrelated data in a shared store.
    pub key_prefix: String,
    /// Optional upper bound on prompt size in bytes. `None` accepts any
    /// prompt.
    pub max_prompt_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expected_entries: 1_000_000,
            false_positive_rate: 0.001, // 0.1%
            local_capacity: 100,
            default_ttl: Duration::from_secs(3600), // 1 hour
            key_prefix: "cache:".to_owned(),
            max_prompt_bytes: None,
        }
    }
}

impl CacheConfig {
    /// Reject parameters the filter and LRU cannot be built from.
    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.expected_entries == 0 {
            return Err(CacheError::Config(
                "expected_entries must be at least 1".to_owned(),
            ));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(CacheError::Config(format!(
                "false_positive_rate must be in (0, 1), got {}",
                self.false_positive_rate
            )));
        }
        if self.local_capacity == 0 {
            return Err(CacheError::Config(
                "local_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
