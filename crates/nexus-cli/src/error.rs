use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] nexus_core::ConfigError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Access(#[from] nexus_core::AccessError),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Usage(_) => 2,
            Self::Access(error) => {
                if error.is_retry_later() {
                    3
                } else {
                    4
                }
            }
            Self::RateLimited { .. } => 6,
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::{AccessError, FetchError};

    #[test]
    fn provider_outages_and_rejections_exit_differently() {
        let outage = CliError::from(AccessError::from_last_attempt(4, FetchError::timeout("slow")));
        let rejected = CliError::from(AccessError::from_last_attempt(
            1,
            FetchError::from_status(404, "missing"),
        ));

        assert_eq!(outage.exit_code(), 3);
        assert_eq!(rejected.exit_code(), 4);
    }
}
