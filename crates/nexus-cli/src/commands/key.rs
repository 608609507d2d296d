use nexus_core::{make_key, KeyParams};
use serde_json::{json, Value};

use crate::cli::{parse_pair, KeyArgs};
use crate::error::CliError;

pub fn run(args: &KeyArgs) -> Result<Value, CliError> {
    let mut params = KeyParams::new();
    for value in &args.args {
        params = params.arg(value.as_str());
    }
    for raw in &args.params {
        let (name, value) = parse_pair(raw)
            .ok_or_else(|| CliError::Usage(format!("expected NAME=VALUE, got '{raw}'")))?;
        params.insert(name, value);
    }

    let key = make_key(&args.namespace, &args.operation, &params);
    Ok(json!({ "key": key }))
}
