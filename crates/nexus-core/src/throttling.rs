use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::provider_policy::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// In-process pacing of calls to one upstream provider.
///
/// Unlike the shared sliding-window limiter this never rejects: it delays the
/// caller until the provider's quota has room again.
#[derive(Clone)]
pub struct UpstreamThrottle {
    provider: String,
    limiter: Arc<DirectRateLimiter>,
    clock: DefaultClock,
}

impl std::fmt::Debug for UpstreamThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamThrottle")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl UpstreamThrottle {
    pub fn new(provider: impl Into<String>, quota_window: Duration, quota_limit: u32) -> Self {
        let clock = DefaultClock::default();
        let quota = quota_from_window(quota_window, quota_limit);
        Self {
            provider: provider.into(),
            limiter: Arc::new(RateLimiter::direct_with_clock(quota, &clock)),
            clock,
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.provider.clone(), policy.quota_window, policy.quota_limit)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Takes one unit of budget, or returns how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Waits until the quota admits one more call.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            debug!(provider = %self.provider, wait_ms = wait.as_millis() as u64, "upstream quota exhausted; pacing");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
