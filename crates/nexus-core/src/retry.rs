//! Bounded retries with exponential backoff.
//!
//! [`ResilientFetcher::execute`] runs an attempt, classifies its failure and
//! either sleeps and tries again (transient) or gives up (terminal or
//! exhausted). The sleep only suspends the calling task. Dropping the returned
//! future cancels the in-flight attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{AccessError, FetchError};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

impl Backoff {
    /// Doubling backoff without jitter, capped at five minutes.
    pub const fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max: Duration::from_secs(300),
            jitter: false,
        }
    }

    /// Calculate the delay after the given failed attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                // +/- 50% of the delay
                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// Configuration for the resilient fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// Per-attempt deadline; exceeding it counts as a transient failure.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Backoff::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff from `base` with `max_retries` retries after the first attempt.
    pub fn exponential(max_retries: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff: Backoff::exponential(base),
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// What happened on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Transient failure; another attempt follows after `wait_before_next`.
    Retrying,
    /// Terminal failure; no further attempts.
    Terminal,
    /// Transient failure on the last allowed attempt.
    Exhausted,
}

/// Structured per-attempt event handed to a [`RetryObserver`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryEvent {
    /// 0-based attempt index.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub wait_before_next: Option<Duration>,
    pub error: Option<FetchError>,
}

/// Hook notified of every attempt.
pub trait RetryObserver: Send + Sync {
    fn on_attempt(&self, event: &RetryEvent);
}

impl<F> RetryObserver for F
where
    F: Fn(&RetryEvent) + Send + Sync,
{
    fn on_attempt(&self, event: &RetryEvent) {
        self(event)
    }
}

/// Default observer emitting attempt events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_attempt(&self, event: &RetryEvent) {
        let wait_ms = event.wait_before_next.map(|wait| wait.as_millis() as u64);
        let error = event.error.as_ref().map(ToString::to_string);
        match event.outcome {
            AttemptOutcome::Success => {
                debug!(attempt = event.attempt, outcome = "success", "fetch attempt");
            }
            AttemptOutcome::Retrying => {
                warn!(attempt = event.attempt, outcome = "retrying", wait_before_next_ms = ?wait_ms, error = ?error, "fetch attempt failed");
            }
            AttemptOutcome::Terminal => {
                warn!(attempt = event.attempt, outcome = "terminal", error = ?error, "fetch attempt rejected");
            }
            AttemptOutcome::Exhausted => {
                error!(attempt = event.attempt, outcome = "exhausted", error = ?error, "all fetch attempts failed");
            }
        }
    }
}

/// Runs fallible operations with bounded retries.
#[derive(Clone)]
pub struct ResilientFetcher {
    config: RetryConfig,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ResilientFetcher {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl ResilientFetcher {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails terminally or runs out of attempts.
    ///
    /// The error carries the attempt count and the last underlying failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, AccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.execute_after(|| std::future::ready(()), operation).await
    }

    /// Like [`execute`](Self::execute), but awaits `before_attempt` ahead of
    /// every attempt. That wait is not charged to the attempt timeout.
    pub async fn execute_after<T, G, GFut, F, Fut>(
        &self,
        mut before_attempt: G,
        mut operation: F,
    ) -> Result<T, AccessError>
    where
        G: FnMut() -> GFut,
        GFut: Future<Output = ()>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            before_attempt().await;
            let result = match self.config.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::timeout(format!(
                        "attempt exceeded {}ms",
                        limit.as_millis()
                    ))),
                },
                None => operation().await,
            };

            let error = match result {
                Ok(value) => {
                    self.emit(attempt, AttemptOutcome::Success, None, None);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let attempts_made = attempt + 1;
            if !error.retryable() {
                self.emit(attempt, AttemptOutcome::Terminal, None, Some(&error));
                return Err(AccessError::InvalidRequest {
                    attempts: attempts_made,
                    last_error: error,
                });
            }
            if attempts_made >= max_attempts {
                self.emit(attempt, AttemptOutcome::Exhausted, None, Some(&error));
                return Err(AccessError::UpstreamUnavailable {
                    attempts: attempts_made,
                    last_error: error,
                });
            }

            let wait = self.config.delay_for_attempt(attempt);
            self.emit(attempt, AttemptOutcome::Retrying, Some(wait), Some(&error));
            tokio::time::sleep(wait).await;
            attempt = attempts_made;
        }
    }

    fn emit(
        &self,
        attempt: u32,
        outcome: AttemptOutcome,
        wait_before_next: Option<Duration>,
        error: Option<&FetchError>,
    ) {
        self.observer.on_attempt(&RetryEvent {
            attempt,
            outcome,
            wait_before_next,
            error: error.cloned(),
        });
    }
}
