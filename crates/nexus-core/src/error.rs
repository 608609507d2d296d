//! Error taxonomy for the resilient access layer.
//!
//! Only [`AccessError`] ever reaches a caller. [`FetchError`] describes a single
//! failed attempt and [`StoreError`] describes a store round-trip; both are
//! absorbed or wrapped by the orchestrator.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Classification of a single failed upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection could not be established or was reset.
    Connect,
    /// The attempt exceeded its timeout.
    Timeout,
    /// Upstream answered with a 5xx, 408 or 429 status.
    UpstreamStatus,
    /// Upstream rejected the request with another 4xx status.
    ClientStatus,
    /// The request could not be built from the caller's input.
    InvalidRequest,
    /// The response body could not be decoded.
    Decode,
}

/// Failure of one upstream attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    status: Option<u16>,
}

impl FetchError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidRequest, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Decode, message)
    }

    /// Classifies a non-success HTTP status.
    ///
    /// Server errors, `408 Request Timeout` and `429 Too Many Requests` are
    /// transient; every other status is terminal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = if status >= 500 || status == 408 || status == 429 {
            FetchErrorKind::UpstreamStatus
        } else {
            FetchErrorKind::ClientStatus
        };
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Whether another attempt may succeed.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Connect | FetchErrorKind::Timeout | FetchErrorKind::UpstreamStatus
        )
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::Connect => "fetch.connect",
            FetchErrorKind::Timeout => "fetch.timeout",
            FetchErrorKind::UpstreamStatus => "fetch.upstream_status",
            FetchErrorKind::ClientStatus => "fetch.client_status",
            FetchErrorKind::InvalidRequest => "fetch.invalid_request",
            FetchErrorKind::Decode => "fetch.decode",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status}, {})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for FetchError {}

/// Failure surfaced to callers of the access layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Transient failures persisted through every allowed attempt.
    #[error("upstream unavailable after {attempts} attempt(s): {last_error}")]
    UpstreamUnavailable { attempts: u32, last_error: FetchError },

    /// The request was rejected and retrying cannot help.
    #[error("invalid request after {attempts} attempt(s): {last_error}")]
    InvalidRequest { attempts: u32, last_error: FetchError },
}

impl AccessError {
    /// Wraps the final attempt error according to its classification.
    pub fn from_last_attempt(attempts: u32, last_error: FetchError) -> Self {
        if last_error.retryable() {
            Self::UpstreamUnavailable { attempts, last_error }
        } else {
            Self::InvalidRequest { attempts, last_error }
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::UpstreamUnavailable { attempts, .. } | Self::InvalidRequest { attempts, .. } => {
                *attempts
            }
        }
    }

    pub const fn last_error(&self) -> &FetchError {
        match self {
            Self::UpstreamUnavailable { last_error, .. }
            | Self::InvalidRequest { last_error, .. } => last_error,
        }
    }

    /// `true` when the caller should try again later rather than fix its input.
    pub const fn is_retry_later(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

/// Failure talking to the shared key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Invalid configuration value read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}, expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_statuses_are_transient() {
        for status in [500, 502, 503, 504, 599, 408, 429] {
            let error = FetchError::from_status(status, "boom");
            assert!(error.retryable(), "status {status} should be retryable");
            assert_eq!(error.kind(), FetchErrorKind::UpstreamStatus);
        }
    }

    #[test]
    fn client_errors_are_terminal() {
        for status in [400, 401, 403, 404, 422] {
            let error = FetchError::from_status(status, "nope");
            assert!(!error.retryable(), "status {status} should be terminal");
            assert_eq!(error.status(), Some(status));
        }
        assert!(!FetchError::invalid_request("bad").retryable());
        assert!(!FetchError::decode("garbled").retryable());
    }

    #[test]
    fn access_error_keeps_attempt_count_and_last_error() {
        let last = FetchError::timeout("deadline exceeded");
        let error = AccessError::from_last_attempt(4, last.clone());

        assert!(error.is_retry_later());
        assert_eq!(error.attempts(), 4);
        assert_eq!(error.last_error(), &last);
        assert!(error.to_string().contains("4 attempt(s)"));
        assert!(error.to_string().contains("fetch.timeout"));
    }

    #[test]
    fn terminal_attempt_maps_to_invalid_request() {
        let error = AccessError::from_last_attempt(1, FetchError::from_status(404, "missing"));
        assert!(matches!(error, AccessError::InvalidRequest { attempts: 1, .. }));
        assert!(!error.is_retry_later());
    }
}
