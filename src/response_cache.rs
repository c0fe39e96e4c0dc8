//! Three-tier response cache
//!
//! Orchestrates the lookup pipeline in front of an expensive generation
//! call:
//! - membership filter: lock-free "definitely absent" gate (no network)
//! - local LRU: per-process, capacity-bounded fast path (no network)
//! - backing store: durable, shared, TTL-owning authority
//!
//! Lookup order is local LRU, then filter, then backing store; a
//! backing-store hit repopulates the LRU. Store order is filter first, then
//! backing store, then LRU, so a racing lookup can at worst see a harmless
//! "not cached" and never a filter false-absent for a durably stored key.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::fingerprint::{fingerprint, ContentKey};
use crate::local_cache::LruCache;
use crate::store::BackingStore;
use crate::{CacheConfig, CacheError};

/// Trait for types that can be cached.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

struct Inner<V, S> {
    filter: BloomFilter,
    // One lock over the whole map+recency structure: eviction stays atomic
    // with insertion, recency updates never race into lost updates. Never
    // held across a backing-store await.
    local: Mutex<LruCache<V>>,
    store: S,
    config: CacheConfig,
}

/// Multi-tier response cache keyed by prompt fingerprint.
///
/// One instance per process, constructed with an injected backing-store
/// handle and configuration, cloned cheaply into request handlers.
pub struct ResponseCache<V: Cacheable, S: BackingStore> {
    inner: Arc<Inner<V, S>>,
}

impl<V: Cacheable, S: BackingStore> Clone for ResponseCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Cacheable, S: BackingStore> ResponseCache<V, S> {
    /// Create a new cache over the given backing store.
    pub fn new(store: S, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let filter = BloomFilter::new(config.expected_entries, config.false_positive_rate);
        let local = Mutex::new(LruCache::new(config.local_capacity));

        Ok(Self {
            inner: Arc::new(Inner {
                filter,
                local,
                store,
                config,
            }),
        })
    }

    /// Look up a cached response for a prompt.
    ///
    /// `Ok(Some(_))` is a hit, `Ok(None)` a confirmed miss, `Err(_)` means
    /// the backing store could not be consulted; callers that want to avoid
    /// regenerating while the store is unhealthy can tell the last two
    /// apart. An `Err` outcome is never cached.
    pub async fn lookup(&self, prompt: &str) -> Result<Option<Arc<V>>, CacheError> {
        let key = self.content_key(prompt)?;

        if let Some(value) = self.local().get(&key) {
            debug!(key = %key.to_hex(), "local cache hit");
            return Ok(Some(value));
        }

        if !self.inner.filter.might_contain(&key) {
            debug!(key = %key.to_hex(), "filter: definitely absent");
            return Ok(None);
        }

        // Filter says "possibly present": the backing store is the
        // authority. The local-cache lock is not held across this call.
        let store_key = self.store_key(&key);
        let cached = self.inner.store.get(&store_key).await?;

        let Some(json) = cached else {
            debug!(key = %key.to_hex(), "filter false positive, backing store miss");
            return Ok(None);
        };

        match serde_json::from_str::<V>(&json) {
            Ok(value) => {
                debug!(key = %key.to_hex(), "backing store hit");
                let value = Arc::new(value);
                self.local().put(key, Arc::clone(&value));
                Ok(Some(value))
            }
            Err(e) => {
                // A corrupt record is as good as absent; the next store()
                // for this prompt overwrites it.
                warn!(
                    key = %key.to_hex(),
                    error = %e,
                    "corrupt backing-store record, treating as miss"
                );
                Ok(None)
            }
        }
    }

    /// Cache a response with the configured default TTL.
    pub async fn store(&self, prompt: &str, value: V) -> Result<(), CacheError> {
        self.store_with_ttl(prompt, value, self.inner.config.default_ttl)
            .await
    }

    /// Cache a response with an explicit TTL.
    ///
    /// The filter is updated before the backing-store write; if the write
    /// fails, the error is returned and the already-set filter bits stay, a
    /// one-sided drift that costs at most one wasted backing-store round
    /// trip on a later lookup of this prompt.
    pub async fn store_with_ttl(
        &self,
        prompt: &str,
        value: V,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = self.content_key(prompt)?;
        self.store_value(key, Arc::new(value), ttl).await
    }

    /// Wrap an expensive generation call: return the cached response if
    /// present, otherwise generate, cache the result, and return it.
    ///
    /// A failed cache write after a successful generation is logged and
    /// swallowed; the fresh value is still returned. If the lookup itself
    /// failed (store unreachable), generation proceeds and the write is
    /// skipped entirely rather than doubling the round trips against an
    /// unhealthy store.
    pub async fn get_or_generate<F, Fut>(
        &self,
        prompt: &str,
        generate: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Box<dyn std::error::Error + Send + Sync>>>,
    {
        // Bounds-check the prompt before anything else: rejected input is
        // fatal to the call and must not reach the generator.
        let key = self.content_key(prompt)?;

        let store_after = match self.lookup(prompt).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "lookup degraded to not-cached, skipping cache write");
                false
            }
        };

        let value = Arc::new(generate().await.map_err(CacheError::Generation)?);

        if store_after {
            let ttl = self.inner.config.default_ttl;
            if let Err(e) = self.store_value(key, Arc::clone(&value), ttl).await {
                warn!(error = %e, "failed to cache generated response");
            }
        }

        Ok(value)
    }

    /// Filter-then-write-then-populate, shared by the store paths.
    async fn store_value(
        &self,
        key: ContentKey,
        value: Arc<V>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(&*value)?;

        self.inner.filter.insert(&key);

        let store_key = self.store_key(&key);
        self.inner.store.set_ex(&store_key, json, ttl).await?;

        debug!(key = %key.to_hex(), ttl_secs = ttl.as_secs(), "stored response");
        self.local().put(key, value);
        Ok(())
    }

    fn content_key(&self, prompt: &str) -> Result<ContentKey, CacheError> {
        if let Some(max) = self.inner.config.max_prompt_bytes {
            if prompt.len() > max {
                return Err(CacheError::InvalidInput(format!(
                    "prompt is {} bytes, bound is {max}",
                    prompt.len()
                )));
            }
        }
        Ok(fingerprint(prompt))
    }

    fn store_key(&self, key: &ContentKey) -> String {
        format!("{}{}", self.inner.config.key_prefix, key.to_hex())
    }

    /// LRU operations cannot panic mid-update, so a poisoned lock still
    /// holds a consistent structure; keep serving rather than propagating
    /// the poison.
    fn local(&self) -> MutexGuard<'_, LruCache<V>> {
        match self.inner.local.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type BoxError = Box<dyn std::error::Error + Send + Sync>;

    /// In-memory stand-in for the Redis tier, counting round trips so
    /// tests can assert which lookups stayed network-free.
    #[derive(Default)]
    struct FakeStore {
        data: Mutex<HashMap<String, String>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
        fail_gets: std::sync::atomic::AtomicBool,
        fail_sets: std::sync::atomic::AtomicBool,
    }

    impl FakeStore {
        fn get_count(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        fn set_count(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }

        fn unavailable_error() -> CacheError {
            CacheError::Timeout(Duration::from_millis(10))
        }
    }

    #[async_trait]
    impl BackingStore for Arc<FakeStore> {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_gets.load(Ordering::SeqCst) {
                return Err(FakeStore::unavailable_error());
            }
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set_ex(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail_sets.load(Ordering::SeqCst) {
                return Err(FakeStore::unavailable_error());
            }
            self.data.lock().unwrap().insert(key.to_owned(), value);
            Ok(())
        }
    }

    fn service(config: CacheConfig) -> (ResponseCache<String, Arc<FakeStore>>, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::default());
        let cache = ResponseCache::new(Arc::clone(&store), config).unwrap();
        (cache, store)
    }

    fn small_config() -> CacheConfig {
        CacheConfig {
            expected_entries: 1000,
            false_positive_rate: 0.001,
            local_capacity: 2,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn store_then_lookup_returns_value() {
        let (cache, _store) = service(CacheConfig::default());

        cache.store("A", "respA".to_owned()).await.unwrap();
        let hit = cache.lookup("A").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&"respA".to_owned()));
    }

    #[tokio::test]
    async fn never_stored_prompt_makes_no_store_calls() {
        let (cache, store) = service(CacheConfig::default());

        assert!(cache.lookup("never-seen").await.unwrap().is_none());
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn lookup_after_store_is_served_locally() {
        let (cache, store) = service(CacheConfig::default());

        cache.store("A", "respA".to_owned()).await.unwrap();
        let sets_before = store.set_count();

        let hit = cache.lookup("A").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&"respA".to_owned()));
        assert_eq!(store.get_count(), 0, "hit must come from the local tier");
        assert_eq!(store.set_count(), sets_before);
    }

    #[tokio::test]
    async fn evicted_key_falls_through_to_backing_store() {
        // n=1000, p=0.001, L=2: storing A, B, C overflows the local tier,
        // but a durably stored, unexpired value must never be lost.
        let (cache, store) = service(small_config());

        cache.store("A", "respA".to_owned()).await.unwrap();
        cache.store("B", "respB".to_owned()).await.unwrap();
        cache.store("C", "respC".to_owned()).await.unwrap();

        let gets_before = store.get_count();
        let hit = cache.lookup("A").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&"respA".to_owned()));
        assert_eq!(store.get_count(), gets_before + 1, "A was evicted locally");

        // The backing-store hit repopulated the local tier.
        let hit = cache.lookup("A").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&"respA".to_owned()));
        assert_eq!(store.get_count(), gets_before + 1);
    }

    #[tokio::test]
    async fn backing_store_miss_does_not_populate_local_tier() {
        let (cache, store) = service(small_config());

        // Set the filter bits without a durable record behind them.
        store.fail_sets.store(true, Ordering::SeqCst);
        assert!(cache.store("ghost", "x".to_owned()).await.is_err());
        store.fail_sets.store(false, Ordering::SeqCst);

        // Filter passes, store confirms absent: one wasted round trip,
        // nothing cached.
        assert!(cache.lookup("ghost").await.unwrap().is_none());
        assert_eq!(store.get_count(), 1);
        assert!(cache.lookup("ghost").await.unwrap().is_none());
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn store_failure_is_surfaced_and_filter_drift_is_one_sided() {
        let (cache, store) = service(small_config());

        store.fail_sets.store(true, Ordering::SeqCst);
        let err = cache.store("A", "respA".to_owned()).await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout(_)));

        // The failed write must not have populated the local tier either:
        // the lookup goes to the store and reports a confirmed miss.
        store.fail_sets.store(false, Ordering::SeqCst);
        assert!(cache.lookup("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unhealthy_store_is_distinct_from_confirmed_miss() {
        let (cache, store) = service(small_config());

        cache.store("A", "respA".to_owned()).await.unwrap();
        // Evict A from the local tier so the lookup must hit the store.
        cache.store("B", "respB".to_owned()).await.unwrap();
        cache.store("C", "respC".to_owned()).await.unwrap();

        store.fail_gets.store(true, Ordering::SeqCst);
        let outcome = cache.lookup("A").await;
        assert!(matches!(outcome, Err(CacheError::Timeout(_))));

        // The degraded outcome was not cached: once the store recovers the
        // value is served again.
        store.fail_gets.store(false, Ordering::SeqCst);
        let hit = cache.lookup("A").await.unwrap();
        assert_eq!(hit.as_deref(), Some(&"respA".to_owned()));
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_miss() {
        let (cache, store) = service(small_config());

        cache.store("A", "respA".to_owned()).await.unwrap();
        cache.store("B", "respB".to_owned()).await.unwrap();
        cache.store("C", "respC".to_owned()).await.unwrap();

        // Corrupt A's record behind the cache's back.
        let key = format!("cache:{}", fingerprint("A").to_hex());
        store
            .data
            .lock()
            .unwrap()
            .insert(key, "{not json".to_owned());

        assert!(cache.lookup("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_generate_only_generates_on_miss() {
        let (cache, store) = service(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let generate = {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>("generated".to_owned())
                }
            }
        };

        let value = cache.get_or_generate("Q", generate.clone()).await.unwrap();
        assert_eq!(&*value, "generated");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.set_count(), 1);

        let value = cache.get_or_generate("Q", generate).await.unwrap();
        assert_eq!(&*value, "generated");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "hit must not regenerate");
    }

    #[tokio::test]
    async fn get_or_generate_returns_fresh_value_when_write_fails() {
        let (cache, store) = service(CacheConfig::default());
        store.fail_sets.store(true, Ordering::SeqCst);

        let value = cache
            .get_or_generate("Q", || async { Ok::<_, BoxError>("generated".to_owned()) })
            .await
            .unwrap();
        assert_eq!(&*value, "generated");
    }

    #[tokio::test]
    async fn get_or_generate_skips_write_when_store_is_unhealthy() {
        let (cache, store) = service(small_config());

        // Pre-set filter bits for Q so the degraded lookup reaches the store.
        store.fail_sets.store(true, Ordering::SeqCst);
        let _ = cache.store("Q", "old".to_owned()).await;
        store.fail_sets.store(false, Ordering::SeqCst);
        // Q never reached the local tier (failed write), so evictions are
        // not needed; make the GET path fail instead.
        store.fail_gets.store(true, Ordering::SeqCst);

        let sets_before = store.set_count();
        let value = cache
            .get_or_generate("Q", || async { Ok::<_, BoxError>("fresh".to_owned()) })
            .await
            .unwrap();
        assert_eq!(&*value, "fresh");
        assert_eq!(store.set_count(), sets_before, "no write against an unhealthy store");
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let (cache, _store) = service(CacheConfig::default());

        let err = cache
            .get_or_generate("Q", || async { Err::<String, BoxError>("model exploded".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Generation(_)));
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected() {
        let config = CacheConfig {
            max_prompt_bytes: Some(8),
            ..CacheConfig::default()
        };
        let (cache, store) = service(config);

        let err = cache.lookup("way past the bound").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        let err = cache
            .store("way past the bound", "v".to_owned())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        assert_eq!(store.get_count() + store.set_count(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let store = Arc::new(FakeStore::default());
        let config = CacheConfig {
            false_positive_rate: 1.5,
            ..CacheConfig::default()
        };
        let result = ResponseCache::<String, _>::new(Arc::clone(&store), config);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn namespaced_keys_carry_the_prefix() {
        let (cache, store) = service(CacheConfig::default());

        cache.store("A", "respA".to_owned()).await.unwrap();
        let data = store.data.lock().unwrap();
        let (key, _) = data.iter().next().unwrap();
        assert!(key.starts_with("cache:"));
        assert_eq!(key.len(), "cache:".len() + 64);
    }

    #[tokio::test]
    async fn concurrent_lookups_and_stores_keep_tiers_consistent() {
        let (cache, _store) = service(CacheConfig {
            local_capacity: 4,
            ..small_config()
        });

        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let prompt = format!("p{}", (task + i) % 10);
                    if task % 2 == 0 {
                        cache.store(&prompt, format!("resp-{prompt}")).await.unwrap();
                    } else if let Some(v) = cache.lookup(&prompt).await.unwrap() {
                        assert_eq!(&*v, &format!("resp-{prompt}"));
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every stored prompt is still retrievable through some tier.
        for i in 0..10 {
            let prompt = format!("p{i}");
            if let Some(v) = cache.lookup(&prompt).await.unwrap() {
                assert_eq!(&*v, &format!("resp-{prompt}"));
            }
        }
    }
}
