//! One-shot query fetch through the cache and the HTTP API.

use syncore_core::CacheKey;

use crate::cli::{FetchArgs, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(cfg: &Config, args: FetchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = config::online_client(cfg, global)?;
    let key = CacheKey::new(args.query, util::json_params(&args.params));
    tracing::debug!(key = %key, "fetching");

    let result = client.fetch(key).await;
    client.shutdown();
    let data = result?;

    let out = output::render_single(
        &global.output,
        &*data,
        output::render_json_pretty,
        |v| match v {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|i| i.get("id").map_or_else(|| i.to_string(), ToString::to_string))
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        },
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
