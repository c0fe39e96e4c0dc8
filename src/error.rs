//! Cache error types

use std::time::Duration;

use redis::RedisError;

/// Cache-related errors.
///
/// Every failure is scoped to a single call; the service never dies on a
/// failed backing-store round trip. A membership-filter false positive is
/// not an error; it costs one wasted backing-store lookup and nothing
/// else.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store was unreachable or returned a protocol error.
    #[error("backing store error: {0}")]
    Store(#[from] RedisError),

    /// A backing-store call exceeded its deadline. Distinct from a
    /// confirmed miss: callers that see this must not treat the value as
    /// definitively absent.
    #[error("backing store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped generation call failed on a cache miss.
    #[error("generation error: {0}")]
    Generation(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// Rejected construction-time configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Rejected per-call input (e.g. a prompt over the configured bound).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
