//! Backing-store boundary
//!
//! The durable, shared tier: a networked key-value service with
//! GET/SET-with-expiry semantics. The cache only depends on the
//! [`BackingStore`] trait, so tests (and alternative stores) can substitute
//! a fake implementing the same contract.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::CacheError;

/// GET/SETEX contract of the durable tier.
///
/// Keys arrive already namespaced (`"cache:" + hex(content key)`); values
/// are opaque serialized strings. Implementations must bound each call with
/// a deadline and surface it as [`CacheError::Timeout`], distinct from a
/// confirmed-absent `Ok(None)`.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Fetch a value, `Ok(None)` meaning confirmed absent (or expired).
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value with the given time-to-live.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed store over a multiplexed connection manager.
///
/// The connection manager reconnects on its own; each command is
/// additionally wrapped in a deadline so a wedged connection degrades a
/// single lookup instead of stalling the caller.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

    /// Connect with the default per-operation deadline.
    pub async fn connect(client: redis::Client) -> Result<Self, CacheError> {
        Self::connect_with_timeout(client, Self::DEFAULT_OP_TIMEOUT).await
    }

    /// Connect with an explicit per-operation deadline.
    pub async fn connect_with_timeout(
        client: redis::Client,
        op_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn, op_timeout })
    }

    /// SETEX takes whole seconds and rejects an expire time of 0, so a
    /// sub-second TTL rounds up to the smallest expiry Redis accepts.
    fn ttl_seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = tokio::time::timeout(self.op_timeout, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        debug!(key, hit = value.is_some(), "backing store GET");
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = Self::ttl_seconds(ttl);
        let mut conn = self.conn.clone();
        tokio::time::timeout(
            self.op_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl_secs),
        )
        .await
        .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        debug!(key, ttl_secs, "backing store SETEX");
        Ok(())
    }
}
