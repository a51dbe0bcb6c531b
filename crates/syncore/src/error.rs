//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, transport and configuration failures into user-facing
//! errors with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use syncore_config::ConfigError;
use syncore_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const INVALID: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Request to the API failed: {message}")]
    #[diagnostic(
        code(syncore::fetch_failed),
        help(
            "Check that the API is reachable and that [api] base_url is correct.\n\
             Use --insecure (-k) for self-signed certificates."
        )
    )]
    FetchFailed { message: String },

    #[error("No API base URL configured")]
    #[diagnostic(
        code(syncore::no_base_url),
        help("Set [api] base_url in {path}, or pass --base-url / SYNCORE_BASE_URL.")
    )]
    NoBaseUrl { path: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("The API rejected the request as unauthorized")]
    #[diagnostic(
        code(syncore::auth_failed),
        help("Provide a token with --token, SYNCORE_TOKEN, [api] token_env or the system keyring.")
    )]
    AuthFailed,

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(syncore::not_found),
        help("Run: syncore {list_command} to see what is declared")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Navigation ───────────────────────────────────────────────────
    #[error("Navigation to '{route}' denied: {reason}")]
    #[diagnostic(code(syncore::denied))]
    Denied { route: String, reason: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Payload does not satisfy schema '{schema}' ({count} field(s) invalid)")]
    #[diagnostic(code(syncore::invalid_payload))]
    InvalidPayload { schema: String, count: usize },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(syncore::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(syncore::config),
        help("Run: syncore config show   to inspect the effective configuration")
    )]
    Config { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(syncore::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(syncore::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::FetchFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Denied { .. } => exit_code::PERMISSION,
            Self::InvalidPayload { .. } => exit_code::INVALID,
            Self::Validation { .. } | Self::NoBaseUrl { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Fetch { message } => {
                if message.contains("Unauthorized") {
                    CliError::AuthFailed
                } else {
                    CliError::FetchFailed { message }
                }
            }

            CoreError::RouteNotFound { identifier } => CliError::NotFound {
                resource_type: "route".into(),
                identifier,
                list_command: "routes list".into(),
            },

            CoreError::SchemaNotFound { name } => CliError::NotFound {
                resource_type: "schema".into(),
                identifier: name,
                list_command: "config show".into(),
            },

            CoreError::MissingParam { route, param } => CliError::Validation {
                field: format!("--param {param}"),
                reason: format!("route '{route}' needs it"),
            },

            CoreError::Validation(report) => CliError::InvalidPayload {
                schema: "payload".into(),
                count: report.error_count(),
            },

            CoreError::DuplicateSchema { .. }
            | CoreError::SchemaCycle { .. }
            | CoreError::InvalidRule { .. }
            | CoreError::DuplicateRoute { .. }
            | CoreError::InvalidTemplate { .. }
            | CoreError::AsyncRulesPresent { .. }
            | CoreError::Config { .. } => CliError::Config {
                message: err.to_string(),
            },

            other => CliError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Core(core) => core.into(),
            ConfigError::Io(io) => CliError::Io(io),
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
