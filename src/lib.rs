//! rcache - Bloom-gated multi-tier response cache
//!
//! This library caches responses to an expensive generation call (e.g. an
//! LLM completion) behind a three-stage lookup pipeline:
//! - Membership filter: probabilistic "definitely absent" gate, so a
//!   never-cached prompt costs zero network round trips
//! - Local cache: small, per-process, capacity-bounded LRU (fastest)
//! - Backing store: Redis, durable and shared across instances, owns TTL
//!
//! The cache supports:
//! - Deterministic prompt fingerprinting (SHA-256 content keys)
//! - Lock-free concurrent filter inserts and queries
//! - A pluggable backing store for testing and alternative services
//! - A miss-driven wrapper around the generation call itself

mod bloom;
mod config;
mod error;
mod fingerprint;
mod local_cache;
mod response_cache;
mod store;

pub use bloom::BloomFilter;
pub use config::CacheConfig;
pub use error::CacheError;
pub use fingerprint::{fingerprint, ContentKey};
pub use local_cache::LruCache;
pub use response_cache::{Cacheable, ResponseCache};
pub use store::{BackingStore, RedisStore};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
