//! Behavior-driven tests for cache-aside access
//!
//! These tests verify what a caller observes when reading provider data
//! through the cache: how often the provider is hit, when entries expire,
//! and what happens when the provider fails.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexus_core::catalog::{COUNTRY_DETAIL, WEATHER_CURRENT};
use nexus_core::{
    make_key, AccessError, CacheAside, FetchError, KeyParams, ManualClock, MemoryStore,
};
use serde_json::{json, Value};

fn cache_with_clock() -> (CacheAside, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (CacheAside::new(store), clock)
}

// =============================================================================
// Key derivation
// =============================================================================

#[test]
fn when_same_arguments_are_given_in_any_order_the_key_is_identical() {
    // Given: Two callers describing the same forecast lookup differently
    let a = KeyParams::new().param("city", "Recife").param("days", 5);
    let b = KeyParams::new().param("days", 5).param("city", "Recife");

    // When: Keys are derived
    let key_a = make_key("weather", "forecast", &a);
    let key_b = make_key("weather", "forecast", &b);

    // Then: They collide on purpose
    assert_eq!(key_a, key_b);
    assert!(key_a.as_str().starts_with("weather:forecast:"));
}

#[test]
fn when_any_argument_differs_the_key_differs() {
    let base = KeyParams::new().param("city", "Recife");

    assert_ne!(
        make_key("weather", "forecast", &base),
        make_key("weather", "forecast", &base.clone().param("days", 3))
    );
    assert_ne!(
        make_key("weather", "forecast", &base),
        make_key("weather", "current", &base)
    );
    assert_ne!(
        make_key("weather", "forecast", &base),
        make_key("news", "forecast", &base)
    );
}

// =============================================================================
// Get-or-compute
// =============================================================================

#[tokio::test]
async fn when_called_twice_within_ttl_the_provider_is_hit_once() {
    // Given: An empty cache and a counting provider call
    let (cache, _) = cache_with_clock();
    let calls = AtomicU32::new(0);
    let key = WEATHER_CURRENT.key(&KeyParams::new().param("city", "Manaus"));

    let fetch = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, AccessError>(json!({ "temp": 31 }))
    };

    // When: The same lookup is made twice
    let first = cache
        .get_or_compute(&key, WEATHER_CURRENT.ttl, fetch)
        .await
        .expect("first lookup succeeds");
    let second = cache
        .get_or_compute(&key, WEATHER_CURRENT.ttl, fetch)
        .await
        .expect("second lookup succeeds");

    // Then: Only the first reached the provider
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.meta.retrieved_from_cache);
    assert!(second.meta.retrieved_from_cache);
    assert_eq!(first.payload, second.payload);
    assert_eq!(second.meta.cache_key, key);
}

#[tokio::test]
async fn when_ttl_elapses_the_entry_is_recomputed() {
    // Given: A value cached with a 10 second TTL
    let (cache, clock) = cache_with_clock();
    let calls = AtomicU32::new(0);
    let key = make_key("cep", "lookup", &KeyParams::new().arg("01001000"));
    let ttl = Duration::from_secs(10);
    let fetch = || async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, AccessError>(n)
    };

    cache.get_or_compute(&key, ttl, fetch).await.unwrap();

    // When: 9 seconds pass
    clock.advance(Duration::from_secs(9));
    let fresh = cache.get_or_compute(&key, ttl, fetch).await.unwrap();

    // Then: The cached value is still served
    assert!(fresh.meta.retrieved_from_cache);
    assert_eq!(fresh.payload, 0);

    // When: 11 seconds have passed in total
    clock.advance(Duration::from_secs(2));
    let stale = cache.get_or_compute(&key, ttl, fetch).await.unwrap();

    // Then: The provider is called again
    assert!(!stale.meta.retrieved_from_cache);
    assert_eq!(stale.payload, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_the_provider_fails_the_error_is_not_cached() {
    // Given: A provider that fails once, then recovers
    let (cache, _) = cache_with_clock();
    let calls = AtomicU32::new(0);
    let key = make_key("books", "details", &KeyParams::new().arg("OL123W"));

    let fetch = || async {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(AccessError::from_last_attempt(
                4,
                FetchError::from_status(503, "maintenance"),
            ))
        } else {
            Ok(json!({ "title": "Dom Casmurro" }))
        }
    };

    // When: The first call fails and the second is made right after
    let failed = cache.get_or_compute(&key, Duration::from_secs(60), fetch).await;
    let recovered = cache
        .get_or_compute(&key, Duration::from_secs(60), fetch)
        .await
        .expect("second call reaches the recovered provider");

    // Then: The failure was surfaced once and never served from cache
    assert!(failed.expect_err("first call fails").is_retry_later());
    assert!(!recovered.meta.retrieved_from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_caching_is_disabled_every_call_reaches_the_provider() {
    let cache = CacheAside::disabled();
    let calls = AtomicU32::new(0);
    let key = make_key("news", "sources", &KeyParams::new());

    for _ in 0..3 {
        let result = cache
            .get_or_compute(&key, Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AccessError>(Value::Null)
            })
            .await
            .unwrap();
        assert!(!result.meta.retrieved_from_cache);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// Wrapped operations and invalidation
// =============================================================================

#[tokio::test]
async fn when_a_wrapped_operation_is_invalidated_it_is_fetched_again() {
    // Given: A wrapped country lookup that has been served once
    let (cache, _) = cache_with_clock();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let country = cache.wrap(COUNTRY_DETAIL, move |_params: KeyParams| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AccessError>(json!({ "name": "Brasil", "capital": "Brasília" }))
        }
    });

    let args = KeyParams::new().param("code", "BR");
    country.call(args.clone()).await.unwrap();
    assert!(country.call(args.clone()).await.unwrap().meta.retrieved_from_cache);

    // When: Every cached country detail is invalidated
    let removed = cache.invalidate_pattern(&COUNTRY_DETAIL.pattern()).await;

    // Then: The next call goes back to the provider
    assert_eq!(removed, 1);
    let refetched = country.call(args).await.unwrap();
    assert!(!refetched.meta.retrieved_from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_a_single_key_is_invalidated_other_entries_survive() {
    let (cache, _) = cache_with_clock();
    let ttl = Duration::from_secs(60);
    let br = COUNTRY_DETAIL.key(&KeyParams::new().param("code", "BR"));
    let pt = COUNTRY_DETAIL.key(&KeyParams::new().param("code", "PT"));

    for key in [&br, &pt] {
        cache
            .get_or_compute(key, ttl, || async { Ok::<_, AccessError>(1u8) })
            .await
            .unwrap();
    }

    assert!(cache.invalidate(&br).await);
    assert!(!cache.invalidate(&br).await);
    assert!(cache.store().exists(pt.as_str()).await.unwrap());
}
