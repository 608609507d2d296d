use std::sync::Arc;
use std::time::Duration;

use nexus_core::{KeyValueStore, NexusConfig, SlidingWindowLimiter};
use serde_json::Value;
use time::OffsetDateTime;

use crate::cli::LimitArgs;
use crate::error::CliError;

pub async fn run(
    args: &LimitArgs,
    config: &NexusConfig,
    store: Arc<dyn KeyValueStore>,
) -> Result<Value, CliError> {
    let limiter = SlidingWindowLimiter::from_config(store, config);
    let max_requests = args.max.unwrap_or(config.rate_limit_requests);
    let window = args
        .window
        .map(Duration::from_secs)
        .unwrap_or(config.rate_limit_window);

    let decision = limiter.allow(&args.identity, max_requests, window).await;

    if let Some(wait) = decision.retry_after(OffsetDateTime::now_utc()) {
        eprintln!("{}", serde_json::to_string(&decision)?);
        return Err(CliError::RateLimited {
            retry_after_secs: wait.as_secs().max(1),
        });
    }

    Ok(serde_json::to_value(&decision)?)
}
