//! CLI configuration - thin wrapper around `syncore_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--config, --base-url, --token, --insecure, --timeout).

use std::path::PathBuf;

use secrecy::SecretString;

use syncore_core::Client;
use syncore_http::HttpFetcher;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use syncore_config::{Config, config_path};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Config file selected by `--config`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the configuration and apply flag overrides.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = syncore_config::load_config_from(&config_file(global))?;

    if let Some(ref url) = global.base_url {
        cfg.api.base_url = Some(url.clone());
    }
    if global.insecure {
        cfg.api.insecure = true;
    }
    if let Some(timeout) = global.timeout {
        cfg.api.timeout_secs = timeout;
    }
    Ok(cfg)
}

/// HTTP fetcher for `cfg`. A `--token` flag wins over the credential chain.
pub fn http_fetcher(cfg: &Config, global: &GlobalOpts) -> Result<HttpFetcher, CliError> {
    if cfg.api.base_url.is_none() {
        return Err(CliError::NoBaseUrl {
            path: config_file(global).display().to_string(),
        });
    }

    let mut transport = cfg.api.transport_config();
    if let Some(ref token) = global.token {
        transport.token = Some(SecretString::from(token.clone()));
    }

    Ok(cfg.api.http_fetcher_with(&transport)?)
}

/// Client with routes and schemas from `cfg` and no fetcher.
pub fn offline_client(cfg: &Config) -> Result<Client, CliError> {
    Ok(cfg.client_builder()?.build()?)
}

/// Client wired to the HTTP API.
pub fn online_client(cfg: &Config, global: &GlobalOpts) -> Result<Client, CliError> {
    let fetcher = http_fetcher(cfg, global)?;
    Ok(cfg.client_builder()?.fetcher(fetcher).build()?)
}
