use thiserror::Error;

use syncore_core::CoreError;

/// Top-level error type for the `syncore-http` crate.
///
/// Covers transport, authentication and API failures. Converted into
/// [`CoreError`] at the fetcher/operation boundary so the cache and the
/// mutation pipeline never see HTTP details.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Bearer token missing, expired or rejected.
    #[error("Unauthorized -- check the API token")]
    Unauthorized,

    /// Token value cannot be sent as a header.
    #[error("Invalid API token: {message}")]
    InvalidToken { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-2xx response from the API.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// Path template could not be filled from the key or payload.
    #[error("Cannot build request path '{template}': missing '{param}'")]
    MissingPathParam { template: String, param: String },

    /// Path parameter value that cannot stand as a single segment.
    #[error("Invalid value '{value}' for path parameter '{param}'")]
    InvalidPathParam { param: String, value: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Response body was not JSON, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// HTTP status code, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<Error> for CoreError {
    fn from(err: Error) -> Self {
        CoreError::Fetch {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "maintenance".into(),
            code: None,
        };
        assert!(err.is_transient());
        assert!(!Error::Unauthorized.is_transient());
        assert!(
            Error::Api {
                status: 404,
                message: String::new(),
                code: None
            }
            .is_not_found()
        );
    }

    #[test]
    fn converts_into_fetch_error() {
        let core: CoreError = Error::Unauthorized.into();
        assert!(matches!(core, CoreError::Fetch { message } if message.contains("Unauthorized")));
    }
}
