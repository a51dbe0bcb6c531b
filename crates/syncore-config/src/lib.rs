//! Shared configuration for syncore clients.
//!
//! TOML file + `SYNCORE_` environment layering, API token resolution
//! (env + keyring + plaintext), and translation into the runtime types of
//! `syncore_core` and `syncore_http`. The CLI adds flag-aware wrappers on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use syncore_core::{
    Backoff, CacheConfig, ClientBuilder, CoreError, NavigationGuard, QueryOptions, RetryPolicy,
    RouteDescriptor, RouteRegistry, SchemaDefinition, SchemaRegistry,
};
use syncore_http::{ApiClient, HttpFetcher, TlsMode, TransportConfig};

/// Keyring service name; the entry user is [`KEYRING_USER`].
pub const KEYRING_SERVICE: &str = "syncore";
pub const KEYRING_USER: &str = "api-token";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Http(#[from] syncore_http::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Presentation defaults for the CLI.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub api: ApiSection,

    #[serde(default)]
    pub guard: GuardSection,

    /// Static route table.
    #[serde(default)]
    pub routes: Vec<RouteDescriptor>,

    /// Declarative validation schemas.
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSection {
    /// Freshness window; `0` makes data stale as soon as it lands.
    #[serde(default)]
    pub stale_after_ms: u64,

    /// How long an unobserved entry is kept before eviction.
    #[serde(default = "default_gc_grace_ms")]
    pub gc_grace_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            stale_after_ms: 0,
            gc_grace_ms: default_gc_grace_ms(),
        }
    }
}

fn default_gc_grace_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrySection {
    /// Total fetcher invocations per fetch cycle; `1` disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// `0` retries immediately.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiSection {
    /// REST API root (e.g., "https://erp.example/api/v1").
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Accept invalid certificates (self-signed dev servers).
    #[serde(default)]
    pub insecure: bool,

    /// Path to an additional PEM CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// API token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the API token.
    pub token_env: Option<String>,

    /// Query name -> path template, e.g. `facture = "/factures/:id"`.
    /// Unlisted queries map to their dotted name.
    #[serde(default)]
    pub queries: BTreeMap<String, String>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
            insecure: false,
            ca_cert: None,
            token: None,
            token_env: None,
            queries: BTreeMap::new(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuardSection {
    /// Route id unauthenticated users are redirected to.
    pub fallback: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "syncore", "syncore").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("syncore");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore:
/// `SYNCORE_API__BASE_URL`, `SYNCORE_CACHE__STALE_AFTER_MS`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SYNCORE_").split("__"));

    let config: Config = figment.extract()?;
    debug!(
        path = %path.display(),
        routes = config.routes.len(),
        schemas = config.schemas.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the API token from the credential chain. `None` means the API
/// is called anonymously.
pub fn resolve_token(api: &ApiSection) -> Option<SecretString> {
    // 1. Env var named by token_env
    if let Some(ref env_name) = api.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    api.token.clone().map(SecretString::from)
}

// ── Translation to runtime types ────────────────────────────────────

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        let backoff = if self.initial_backoff_ms == 0 {
            Backoff::None
        } else {
            Backoff::Exponential {
                initial: Duration::from_millis(self.initial_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
                multiplier: self.multiplier,
                jitter: self.jitter,
            }
        };
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff,
        }
    }
}

impl ApiSection {
    /// Transport settings with the resolved token.
    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.timeout_secs),
            token: resolve_token(self),
        }
    }

    pub fn api_client(&self) -> Result<ApiClient, ConfigError> {
        self.api_client_with(&self.transport_config())
    }

    /// Like [`api_client`](Self::api_client) with caller-supplied transport
    /// settings (e.g. a token passed on the command line).
    pub fn api_client_with(&self, transport: &TransportConfig) -> Result<ApiClient, ConfigError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| ConfigError::Validation {
                field: "api.base_url".into(),
                reason: "not configured".into(),
            })?;
        Ok(ApiClient::new(base_url, transport)?)
    }

    /// Fetcher over [`api_client`](Self::api_client) with the `queries` table.
    pub fn http_fetcher(&self) -> Result<HttpFetcher, ConfigError> {
        self.http_fetcher_with(&self.transport_config())
    }

    pub fn http_fetcher_with(&self, transport: &TransportConfig) -> Result<HttpFetcher, ConfigError> {
        let mut fetcher = HttpFetcher::new(Arc::new(self.api_client_with(transport)?));
        for (query, template) in &self.queries {
            fetcher = fetcher.route(query.clone(), template)?;
        }
        Ok(fetcher)
    }
}

impl Config {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            gc_grace: Duration::from_millis(self.cache.gc_grace_ms),
            defaults: QueryOptions {
                stale_after: Duration::from_millis(self.cache.stale_after_ms),
                retry: self.retry.policy(),
            },
        }
    }

    pub fn route_registry(&self) -> Result<RouteRegistry, ConfigError> {
        Ok(RouteRegistry::from_table(self.routes.iter().cloned())?)
    }

    /// Guard over the configured routes, with `[guard] fallback` applied.
    pub fn navigation_guard(&self) -> Result<NavigationGuard, ConfigError> {
        let guard = NavigationGuard::new(Arc::new(self.route_registry()?));
        match &self.guard.fallback {
            Some(fallback) => Ok(guard.with_fallback(fallback)?),
            None => Ok(guard),
        }
    }

    pub fn schema_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let mut registry = SchemaRegistry::new();
        for definition in self.schemas.iter().cloned() {
            registry.register(definition.into_schema()?)?;
        }
        Ok(registry)
    }

    /// Builder carrying the cache settings, routes, fallback and schemas.
    /// The caller still chooses the fetcher.
    pub fn client_builder(&self) -> Result<ClientBuilder, ConfigError> {
        let mut builder = ClientBuilder::default()
            .cache_config(self.cache_config())
            .routes(self.routes.iter().cloned())
            .schemas(self.schema_registry()?);
        if let Some(fallback) = &self.guard.fallback {
            builder = builder.login_route(fallback.clone());
        }
        Ok(builder)
    }
}
