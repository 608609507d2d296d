use std::sync::Arc;

use nexus_core::{store::redact_url, KeyValueStore, NexusConfig};
use serde_json::{json, Value};

use crate::error::CliError;

pub async fn run(config: &NexusConfig, store: Arc<dyn KeyValueStore>) -> Result<Value, CliError> {
    let healthy = store.health_check().await.unwrap_or(false);

    Ok(json!({
        "store": store.provider_name(),
        "url": redact_url(&config.store.url),
        "healthy": healthy,
        "degraded": !healthy,
        "cache_enabled": config.cache_enabled,
        "rate_limit_enabled": config.rate_limit_enabled,
    }))
}
