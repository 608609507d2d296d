use std::sync::Arc;

use nexus_core::{catalog, namespace_pattern, CacheAside, CacheKey, KeyValueStore, NexusConfig};
use serde_json::{json, Value};

use crate::cli::InvalidateArgs;
use crate::error::CliError;

pub async fn run(
    args: &InvalidateArgs,
    config: &NexusConfig,
    store: Arc<dyn KeyValueStore>,
) -> Result<Value, CliError> {
    let cache = CacheAside::from_config(store, config);

    if let Some(key) = &args.key {
        let removed = cache.invalidate(&CacheKey::from_raw(key.as_str())).await;
        return Ok(json!({ "key": key, "removed": u64::from(removed) }));
    }

    let pattern = target_pattern(args)?;
    let removed = cache.invalidate_pattern(&pattern).await;
    Ok(json!({ "pattern": pattern, "removed": removed }))
}

fn target_pattern(args: &InvalidateArgs) -> Result<String, CliError> {
    if let Some(name) = &args.operation {
        let operation = catalog::find(name)
            .ok_or_else(|| CliError::Usage(format!("unknown operation '{name}'")))?;
        return Ok(operation.pattern());
    }
    if let Some(namespace) = &args.namespace {
        return Ok(namespace_pattern(namespace, None));
    }
    args.pattern
        .clone()
        .ok_or_else(|| CliError::Usage(String::from("nothing to invalidate")))
}
