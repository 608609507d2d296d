mod fetch;
mod health;
mod invalidate;
mod key;
mod limit;

use std::sync::Arc;

use nexus_core::{catalog, connect_store, KeyValueStore, NexusConfig};
use serde_json::{json, Value};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli, config: &NexusConfig) -> Result<Value, CliError> {
    match &cli.command {
        Command::Fetch(args) => fetch::run(args, config, store(config).await).await,
        Command::Key(args) => key::run(args),
        Command::Invalidate(args) => invalidate::run(args, config, store(config).await).await,
        Command::Limit(args) => limit::run(args, config, store(config).await).await,
        Command::Operations => Ok(operations()),
        Command::Health => health::run(config, store(config).await).await,
    }
}

async fn store(config: &NexusConfig) -> Arc<dyn KeyValueStore> {
    connect_store(&config.store).await
}

fn operations() -> Value {
    let operations: Vec<Value> = catalog::ALL
        .iter()
        .map(|op| {
            json!({
                "name": format!("{}.{}", op.namespace, op.operation),
                "ttl_seconds": op.ttl.as_secs(),
                "pattern": op.pattern(),
            })
        })
        .collect();
    json!({ "operations": operations })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_listing_covers_the_catalog() {
        let listing = operations();
        let entries = listing["operations"].as_array().expect("array");

        assert_eq!(entries.len(), catalog::ALL.len());
        assert!(entries
            .iter()
            .any(|e| e["name"] == "countries.all" && e["ttl_seconds"] == 86_400));
    }
}
