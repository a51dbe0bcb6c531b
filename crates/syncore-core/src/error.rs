// ── Core error types ──
//
// Every failure the core can surface to a view layer. Transport crates
// translate their own errors into these variants; views never see HTTP
// status codes or JSON parse failures directly.

use thiserror::Error;

use crate::validation::ValidationReport;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Query errors ─────────────────────────────────────────────────
    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("Query '{key}' was evicted before it settled")]
    QueryEvicted { key: String },

    // ── Mutation errors ──────────────────────────────────────────────
    #[error("Mutation '{operation}' failed: {message}")]
    Mutation { operation: String, message: String },

    #[error("Validation failed for {} field(s)", .0.error_count())]
    Validation(ValidationReport),

    // ── Schema registration errors ───────────────────────────────────
    #[error("Schema '{name}' is already registered")]
    DuplicateSchema { name: String },

    #[error("Schema composition cycle: {}", .path.join(" -> "))]
    SchemaCycle { path: Vec<String> },

    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Schema '{schema}' declares asynchronous rules; use validate_async")]
    AsyncRulesPresent { schema: String },

    #[error("Invalid rule for field '{field}': {reason}")]
    InvalidRule { field: String, reason: String },

    // ── Routing errors ───────────────────────────────────────────────
    #[error("Route not found: {identifier}")]
    RouteNotFound { identifier: String },

    #[error("Route '{id}' is declared more than once")]
    DuplicateRoute { id: String },

    #[error("Invalid path template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Missing parameter '{param}' for route '{route}'")]
    MissingParam { route: String, param: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Query cache has been shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a fetcher failure with a plain message.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Shorthand for a write failure reported by a mutation operation.
    pub fn mutation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mutation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a rejected payload rather than a
    /// failed write.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The validation report carried by [`CoreError::Validation`].
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self {
            Self::Validation(report) => Some(report),
            _ => None,
        }
    }
}
