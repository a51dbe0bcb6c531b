//! Shared helpers for command handlers.

use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};

use syncore_core::RouteParams;

use crate::error::CliError;

/// Read a JSON document from `path`, or stdin when `path` is `-`.
pub fn read_json_input(path: &Path) -> Result<Value, CliError> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&raw)?)
}

/// `-P key=value` pairs as route params.
pub fn route_params(pairs: &[(String, String)]) -> RouteParams {
    pairs.iter().cloned().collect()
}

/// `-P key=value` pairs as a JSON object. Values that parse as JSON keep
/// their type (`42`, `true`, `[1,2]`); anything else is a string.
pub fn json_params(pairs: &[(String, String)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
            (k.clone(), value)
        })
        .collect();
    Value::Object(map)
}
