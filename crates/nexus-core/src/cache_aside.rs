//! Get-or-populate caching around arbitrary async operations.
//!
//! The store is consulted first; on a miss, or when the store cannot be
//! reached, the operation runs and a successful result is written back with
//! its TTL. Store failures never reach the caller. Failed computations are
//! never cached.
//!
//! Concurrent misses for the same key are not coalesced: each caller runs the
//! computation independently.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache_key::{CacheKey, KeyParams};
use crate::catalog::CachedOperation;
use crate::config::NexusConfig;
use crate::error::StoreError;
use crate::store::{KeyValueStore, OfflineStore};

/// Where a result came from and how long it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchMeta {
    pub retrieved_from_cache: bool,
    pub elapsed_seconds: f64,
    pub cache_key: CacheKey,
}

/// A result plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub payload: T,
    pub meta: FetchMeta,
}

impl<T> Fetched<T> {
    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            payload: f(self.payload),
            meta: self.meta,
        }
    }
}

/// Arguments that know how to describe themselves as key parameters.
pub trait CacheArgs {
    fn key_params(&self) -> KeyParams;
}

impl CacheArgs for KeyParams {
    fn key_params(&self) -> KeyParams {
        self.clone()
    }
}

/// Cache-aside orchestrator over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    enabled: bool,
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("store", &self.store.provider_name())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            enabled: true,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &NexusConfig) -> Self {
        Self::new(store).with_enabled(config.cache_enabled)
    }

    /// Pass-through orchestrator that never touches a store.
    pub fn disabled() -> Self {
        Self::new(Arc::new(OfflineStore::new("caching disabled"))).with_enabled(false)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the cached value for `key`, or runs `compute` and caches its
    /// success for `ttl` (`Duration::ZERO` keeps it until invalidated).
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Fetched<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();

        if self.enabled {
            if let Some(payload) = self.read::<T>(key).await {
                return Ok(Fetched {
                    payload,
                    meta: meta(key, true, started),
                });
            }
        }

        let payload = compute().await?;

        if self.enabled {
            self.write(key, &payload, ttl).await;
        }

        Ok(Fetched {
            payload,
            meta: meta(key, false, started),
        })
    }

    /// Binds an operation descriptor and a function into a reusable cached call.
    pub fn wrap<F>(&self, operation: CachedOperation, inner: F) -> Cached<F> {
        Cached {
            cache: self.clone(),
            operation,
            inner,
        }
    }

    /// Removes one entry. Returns `false` when nothing was removed or the store failed.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        if !self.enabled {
            return false;
        }
        match self.store.delete(key.as_str()).await {
            Ok(removed) => {
                debug!(key = %key, removed, "cache invalidate");
                removed
            }
            Err(e) => {
                degraded("delete", key.as_str(), &e);
                false
            }
        }
    }

    /// Removes every entry matching a glob pattern, returning how many went away.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        if !self.enabled {
            return 0;
        }
        match self.store.delete_pattern(pattern).await {
            Ok(count) => {
                debug!(pattern, count, "cache pattern invalidate");
                count
            }
            Err(e) => {
                degraded("delete_pattern", pattern, &e);
                0
            }
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                degraded("get", key.as_str(), &e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                degraded("decode", key.as_str(), &StoreError::Serialization(e.to_string()));
                // Drop the unreadable entry so the next write replaces it cleanly.
                if let Err(e) = self.store.delete(key.as_str()).await {
                    degraded("delete", key.as_str(), &e);
                }
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &CacheKey, payload: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                degraded("encode", key.as_str(), &StoreError::Serialization(e.to_string()));
                return;
            }
        };

        match self.store.set(key.as_str(), bytes, Some(ttl)).await {
            Ok(()) => debug!(key = %key, ttl_seconds = ttl.as_secs(), "cache set"),
            Err(e) => degraded("set", key.as_str(), &e),
        }
    }
}

/// A function bound to a [`CachedOperation`]; see [`CacheAside::wrap`].
#[derive(Debug, Clone)]
pub struct Cached<F> {
    cache: CacheAside,
    operation: CachedOperation,
    inner: F,
}

impl<F> Cached<F> {
    pub fn operation(&self) -> &CachedOperation {
        &self.operation
    }

    /// Derives the key from `args`, then serves from cache or calls the wrapped function.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<Fetched<T>, E>
    where
        A: CacheArgs,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let key = self.operation.key(&args.key_params());
        self.cache
            .get_or_compute(&key, self.operation.ttl, || (self.inner)(args))
            .await
    }
}

fn meta(key: &CacheKey, retrieved_from_cache: bool, started: Instant) -> FetchMeta {
    FetchMeta {
        retrieved_from_cache,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        cache_key: key.clone(),
    }
}

fn degraded(operation: &'static str, key: &str, error: &StoreError) {
    warn!(operation, key, error = %error, "cache store degraded; bypassing");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cache_key::make_key;
    use crate::store::{MemoryStore, StoreFuture, WindowOutcome, WindowRequest};

    fn cache() -> (CacheAside, MemoryStore) {
        let store = MemoryStore::new();
        (CacheAside::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (cache, _) = cache();
        let key = make_key("books", "search", &KeyParams::new().param("q", "dune"));
        let calls = AtomicU32::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(vec![String::from("Dune")])
        };

        let first = cache.get_or_compute(&key, Duration::from_secs(60), compute).await;
        let second = cache.get_or_compute(&key, Duration::from_secs(60), compute).await;

        let first = first.expect("computed");
        let second = second.expect("cached");
        assert!(!first.meta.retrieved_from_cache);
        assert!(second.meta.retrieved_from_cache);
        assert_eq!(first.payload, second.payload);
        assert_eq!(second.meta.cache_key, key);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (cache, store) = cache();
        let key = make_key("news", "headlines", &KeyParams::new());

        let failed: Result<Fetched<u32>, &str> = cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Err("upstream down") })
            .await;
        assert_eq!(failed.expect_err("error passes through"), "upstream down");
        assert!(store.is_empty().await);

        let recovered: Result<Fetched<u32>, &str> = cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Ok(7) })
            .await;
        assert!(!recovered.expect("recomputed").meta.retrieved_from_cache);
    }

    #[tokio::test]
    async fn corrupt_entries_are_recomputed_and_replaced() {
        let (cache, store) = cache();
        let key = make_key("countries", "all", &KeyParams::new());
        store
            .set(key.as_str(), b"not json".to_vec(), None)
            .await
            .expect("memory set");

        let fetched: Fetched<u32> = cache
            .get_or_compute(&key, Duration::ZERO, || async { Ok::<_, ()>(3) })
            .await
            .expect("recomputed");

        assert!(!fetched.meta.retrieved_from_cache);
        assert_eq!(store.get(key.as_str()).await.expect("memory get"), Some(b"3".to_vec()));
    }

    /// Serves an undecodable entry for every key and refuses deletes.
    #[derive(Default)]
    struct CorruptUndeletableStore {
        inner: MemoryStore,
        delete_attempts: AtomicU32,
    }

    impl KeyValueStore for CorruptUndeletableStore {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
            Box::pin(async { Ok(Some(b"{truncated".to_vec())) })
        }

        fn set<'a>(
            &'a self,
            key: &'a str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> StoreFuture<'a, ()> {
            self.inner.set(key, value, ttl)
        }

        fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
            self.delete_attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StoreError::Unavailable(String::from("connection reset"))) })
        }

        fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
            self.inner.exists(key)
        }

        fn delete_pattern<'a>(&'a self, pattern: &'a str) -> StoreFuture<'a, u64> {
            self.inner.delete_pattern(pattern)
        }

        fn admit_in_window<'a>(
            &'a self,
            key: &'a str,
            request: WindowRequest,
        ) -> StoreFuture<'a, WindowOutcome> {
            self.inner.admit_in_window(key, request)
        }

        fn health_check<'a>(&'a self) -> StoreFuture<'a, bool> {
            self.inner.health_check()
        }

        fn provider_name(&self) -> &'static str {
            "corrupt-undeletable"
        }
    }

    #[tokio::test]
    async fn failed_cleanup_of_corrupt_entry_still_recomputes() {
        let store = Arc::new(CorruptUndeletableStore::default());
        let cache = CacheAside::new(store.clone());
        let key = make_key("books", "details", &KeyParams::new().arg("OL1W"));

        let fetched: Fetched<u32> = cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Ok::<_, ()>(9) })
            .await
            .expect("cleanup failure stays inside the cache layer");

        assert_eq!(fetched.payload, 9);
        assert!(!fetched.meta.retrieved_from_cache);
        assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 1);
        assert!(store.inner.exists(key.as_str()).await.expect("memory exists"));
    }

    #[tokio::test]
    async fn disabled_cache_always_computes() {
        let cache = CacheAside::disabled();
        let key = make_key("cep", "lookup", &KeyParams::new().arg("01001000"));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let fetched = cache
                .get_or_compute(&key, Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(true)
                })
                .await
                .expect("pass-through");
            assert!(!fetched.meta.retrieved_from_cache);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.invalidate(&key).await);
    }

    #[tokio::test]
    async fn invalidation_forces_recompute() {
        let (cache, _) = cache();
        let key = make_key("weather", "current", &KeyParams::new().param("city", "Natal"));

        cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Ok::<_, ()>(1) })
            .await
            .expect("computed");
        assert!(cache.invalidate(&key).await);

        let again = cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Ok::<_, ()>(2) })
            .await
            .expect("recomputed");
        assert_eq!(again.payload, 2);
        assert!(!again.meta.retrieved_from_cache);

        assert_eq!(cache.invalidate_pattern("weather:*").await, 1);
    }

    #[tokio::test]
    async fn wrapped_function_caches_per_argument_set() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let lookup = cache.wrap(
            CachedOperation::new("cep", "lookup", Duration::from_secs(86_400)),
            move |params: KeyParams| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(format!("{params:?}").len())
                }
            },
        );

        let a = KeyParams::new().arg("01001000");
        let b = KeyParams::new().arg("20040002");

        assert!(!lookup.call(a.clone()).await.expect("a").meta.retrieved_from_cache);
        assert!(lookup.call(a).await.expect("a again").meta.retrieved_from_cache);
        assert!(!lookup.call(b).await.expect("b").meta.retrieved_from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
