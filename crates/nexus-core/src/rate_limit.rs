//! Sliding-window request quota per caller identity.
//!
//! Each identity owns a sorted set of admission timestamps in the shared
//! store. A call prunes entries older than the window, counts the rest and is
//! admitted (and recorded) only while the count is below the quota. The
//! prune-count-record sequence is a single atomic store operation.
//!
//! The limiter degrades open: when the store cannot be reached every request
//! is admitted, so the quota is not enforced during store outages.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::clock::{duration_to_millis, millis_to_datetime, Clock, SystemClock};
use crate::config::NexusConfig;
use crate::store::{KeyValueStore, WindowRequest};

const KEY_PREFIX: &str = "rate_limit";

/// Advisory quota state returned with every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Further requests admissible in the current window.
    pub remaining: u32,
    /// When the oldest counted entry leaves the window.
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

/// Outcome of [`SlidingWindowLimiter::allow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub admitted: bool,
    pub info: RateLimitInfo,
}

impl RateDecision {
    /// Seconds a rejected caller should wait, for `Retry-After` style hints.
    pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
        if self.admitted {
            return None;
        }
        let wait = self.info.reset_at - now;
        Some(Duration::try_from(wait).unwrap_or(Duration::ZERO))
    }
}

/// Sliding-window limiter over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    default_max_requests: u32,
    default_window: Duration,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("store", &self.store.provider_name())
            .field("enabled", &self.enabled)
            .field("default_max_requests", &self.default_max_requests)
            .field("default_window", &self.default_window)
            .finish()
    }
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let defaults = NexusConfig::default();
        Self {
            store,
            clock: Arc::new(SystemClock),
            enabled: true,
            default_max_requests: defaults.rate_limit_requests,
            default_window: defaults.rate_limit_window,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &NexusConfig) -> Self {
        Self::new(store)
            .with_enabled(config.rate_limit_enabled)
            .with_defaults(config.rate_limit_requests, config.rate_limit_window)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_defaults(mut self, max_requests: u32, window: Duration) -> Self {
        self.default_max_requests = max_requests;
        self.default_window = window;
        self
    }

    /// Checks `identity` against the configured default quota.
    pub async fn allow_default(&self, identity: &str) -> RateDecision {
        self.allow(identity, self.default_max_requests, self.default_window)
            .await
    }

    /// Admits or rejects one request from `identity`.
    pub async fn allow(&self, identity: &str, max_requests: u32, window: Duration) -> RateDecision {
        let now_millis = self.clock.now_millis();
        let window_millis = duration_to_millis(window);

        if !self.enabled {
            return open_decision(max_requests, now_millis, window_millis);
        }

        let key = format!("{KEY_PREFIX}:{identity}");
        let request = WindowRequest {
            now_millis,
            window,
            max_requests,
        };

        match self.store.admit_in_window(&key, request).await {
            Ok(outcome) => {
                let oldest = outcome.oldest_millis.unwrap_or(now_millis);
                let decision = RateDecision {
                    admitted: outcome.admitted,
                    info: RateLimitInfo {
                        remaining: max_requests.saturating_sub(outcome.count),
                        reset_at: millis_to_datetime(oldest + window_millis),
                    },
                };
                if decision.admitted {
                    debug!(identity, remaining = decision.info.remaining, "rate limit admitted");
                } else {
                    debug!(identity, max_requests, "rate limit rejected");
                }
                decision
            }
            Err(e) => {
                warn!(identity, error = %e, "rate limit store degraded; admitting");
                open_decision(max_requests, now_millis, window_millis)
            }
        }
    }
}

fn open_decision(max_requests: u32, now_millis: i64, window_millis: i64) -> RateDecision {
    RateDecision {
        admitted: true,
        info: RateLimitInfo {
            remaining: max_requests,
            reset_at: millis_to_datetime(now_millis + window_millis),
        },
    }
}
