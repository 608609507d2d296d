//! # Nexus Core
//!
//! Resilient access layer for rate-limited third-party data providers.
//!
//! ## Overview
//!
//! Provider calls are slow, quota-limited and occasionally flaky. This crate
//! wraps them in four cooperating pieces:
//!
//! - **Cache key derivation**: deterministic keys from an operation name and its arguments
//! - **Resilient fetching**: bounded retries with exponential backoff for transient failures
//! - **Cache-aside orchestration**: serve from a shared expiring store, populate on miss
//! - **Sliding-window rate limiting**: per-identity quotas enforced through the same store
//!
//! The shared store is pluggable: Redis in production, an in-memory store for
//! tests and single-process use, and an offline store that fails every call so
//! the layer degrades to pass-through when Redis is down.
//!
//! ## Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `default` | Standard feature set |
//! | `redis-tests` | Tests that need a live Redis at `REDIS_URL` |
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache_aside`] | Get-or-compute orchestration and invalidation |
//! | [`cache_key`] | Key derivation from operation arguments |
//! | [`catalog`] | Cached provider operations and their TTLs |
//! | [`clock`] | Wall-clock abstraction with a manual test clock |
//! | [`config`] | Environment-driven configuration |
//! | [`error`] | Fetch, access, store and config errors |
//! | [`http_client`] | HTTP transport and the cached, retried HTTP fetcher |
//! | [`provider_policy`] | Published outbound quotas per provider |
//! | [`rate_limit`] | Sliding-window limiter |
//! | [`retry`] | Backoff policies and the resilient fetcher |
//! | [`store`] | Key-value store contract and adapters |
//! | [`throttling`] | In-process pacing of outbound provider calls |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nexus_core::{connect_store, HttpFetcher, NexusConfig, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NexusConfig::from_env()?;
//!     let store = connect_store(&config.store).await;
//!     let fetcher = HttpFetcher::from_config(Arc::new(ReqwestHttpClient::new()), store, &config);
//!
//!     let result = fetcher
//!         .get("https://restcountries.com/v3.1/alpha/br", &Default::default())
//!         .await?;
//!     println!("from cache: {}", result.meta.retrieved_from_cache);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Caller         │────▶│ Rate Limiter     │──┐
//! └────────┬────────┘     └──────────────────┘  │
//!          │                                    │
//!          ▼                                    ▼
//! ┌─────────────────┐     ┌──────────────────────────┐
//! │  Cache-Aside    │────▶│ KeyValueStore            │
//! │  Orchestrator   │     │ (redis/memory/offline)   │
//! └────────┬────────┘     └──────────────────────────┘
//!          │ miss
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Resilient       │────▶│ Upstream Throttle│
//! │ Fetcher (retry) │     └──────────────────┘
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ HTTP Client     │
//! │ (reqwest)       │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Store failures never reach callers. Provider failures surface as
//! [`AccessError`], which tells the caller whether to retry later:
//!
//! ```rust
//! use nexus_core::{AccessError, FetchErrorKind};
//!
//! fn describe(error: &AccessError) -> &'static str {
//!     if error.is_retry_later() {
//!         return "provider unavailable, try again later";
//!     }
//!     match error.last_error().kind() {
//!         FetchErrorKind::ClientStatus => "provider rejected the request",
//!         _ => "request could not be sent",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are read from the environment and never logged
//! - Store URLs are redacted before logging
//! - Credential headers are hashed into cache keys, never stored in clear

pub mod cache_aside;
pub mod cache_key;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod http_client;
pub mod provider_policy;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod throttling;

// Re-export commonly used types at crate root for convenience

// Cache-aside orchestration
pub use cache_aside::{CacheArgs, CacheAside, Cached, FetchMeta, Fetched};

// Key derivation
pub use cache_key::{make_key, namespace_pattern, CacheKey, KeyParams, ParamValue};

// Operation catalog
pub use catalog::CachedOperation;

// Clocks
pub use clock::{Clock, ManualClock, SystemClock};

// Configuration
pub use config::{LogFormat, NexusConfig, StoreConfig};

// Error types
pub use error::{
    AccessError, ConfigError, FetchError, FetchErrorKind, StoreError, StoreResult,
};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpFetcher, HttpMethod, HttpPayload, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Provider policies
pub use provider_policy::ProviderPolicy;

// Rate limiting
pub use rate_limit::{RateDecision, RateLimitInfo, SlidingWindowLimiter};

// Retry logic
pub use retry::{
    AttemptOutcome, Backoff, ResilientFetcher, RetryConfig, RetryEvent, RetryObserver,
    TracingObserver,
};

// Stores
pub use store::{
    connect_store, KeyValueStore, MemoryStore, OfflineStore, RedisStore, WindowOutcome,
    WindowRequest,
};

// Throttling
pub use throttling::UpstreamThrottle;
