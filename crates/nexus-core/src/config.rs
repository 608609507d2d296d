//! Runtime configuration read from the environment.

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::{Backoff, RetryConfig};

/// Connection settings for the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Deadline for each command reply. A server that stops answering
    /// surfaces as `StoreError::Unavailable` once this elapses.
    pub response_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379/0"),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Everything the access layer reads at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct NexusConfig {
    pub cache_enabled: bool,
    pub default_ttl: Duration,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub http_timeout: Duration,
    pub store: StoreConfig,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            default_ttl: Duration::from_secs(3600),
            rate_limit_enabled: true,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(3600),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            store: StoreConfig::default(),
            log_level: String::from("info"),
            log_format: LogFormat::Json,
        }
    }
}

impl NexusConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let store = StoreConfig {
            url: match env.raw("REDIS_URL") {
                Some(url) => url,
                None => redis_url_from_parts(&env)?,
            },
            connect_timeout: env
                .secs("REDIS_CONNECT_TIMEOUT")?
                .unwrap_or(defaults.store.connect_timeout),
            response_timeout: env
                .secs("REDIS_SOCKET_TIMEOUT")?
                .unwrap_or(defaults.store.response_timeout),
        };

        let log_format = match env.raw("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => defaults.log_format,
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) if v == "text" => LogFormat::Text,
            Some(value) => {
                return Err(ConfigError::InvalidValue {
                    var: "LOG_FORMAT",
                    value,
                    expected: "json or text",
                })
            }
        };

        Ok(Self {
            cache_enabled: env.flag("CACHE_ENABLED")?.unwrap_or(defaults.cache_enabled),
            default_ttl: env.secs("CACHE_TTL")?.unwrap_or(defaults.default_ttl),
            rate_limit_enabled: env
                .flag("RATE_LIMIT_ENABLED")?
                .unwrap_or(defaults.rate_limit_enabled),
            rate_limit_requests: env
                .number("RATE_LIMIT_REQUESTS")?
                .unwrap_or(defaults.rate_limit_requests),
            rate_limit_window: env
                .secs("RATE_LIMIT_WINDOW")?
                .unwrap_or(defaults.rate_limit_window),
            max_retries: env.number("MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_delay: env
                .number::<u64>("RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            http_timeout: env.secs("HTTP_TIMEOUT")?.unwrap_or(defaults.http_timeout),
            store,
            log_level: env.raw("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
        })
    }

    /// Retry policy implied by `max_retries` and `base_delay`.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries.saturating_add(1),
            backoff: Backoff::exponential(self.base_delay),
            attempt_timeout: Some(self.http_timeout),
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        self.raw(var)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    var,
                    value,
                    expected: "a boolean",
                }),
            })
            .transpose()
    }

    fn number<T: std::str::FromStr>(&self, var: &'static str) -> Result<Option<T>, ConfigError> {
        self.raw(var)
            .map(|value| {
                value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                    var,
                    value,
                    expected: "a non-negative integer",
                })
            })
            .transpose()
    }

    fn secs(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.number::<u64>(var)?.map(Duration::from_secs))
    }
}

fn redis_url_from_parts<F: Fn(&str) -> Option<String>>(
    env: &Env<'_, F>,
) -> Result<String, ConfigError> {
    let host = env.raw("REDIS_HOST").unwrap_or_else(|| String::from("localhost"));
    let port = env.number::<u16>("REDIS_PORT")?.unwrap_or(6379);
    let db = env.number::<u32>("REDIS_DB")?.unwrap_or(0);

    Ok(match env.raw("REDIS_PASSWORD") {
        Some(password) => format!(
            "redis://:{}@{host}:{port}/{db}",
            urlencoding::encode(&password)
        ),
        None => format!("redis://{host}:{port}/{db}"),
    })
}
