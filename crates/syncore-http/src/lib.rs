//! HTTP adapters for the syncore query cache and mutation pipeline.
//!
//! - [`HttpFetcher`] - a [`syncore_core::Fetcher`] issuing `GET` requests
//!   derived from cache keys.
//! - [`HttpOperation`] - a [`syncore_core::Operation`] sending payloads with
//!   `POST` / `PUT` / `PATCH` / `DELETE`.
//! - [`TransportConfig`] - shared TLS, timeout and bearer-token settings.

pub mod client;
pub mod error;
pub mod fetcher;
pub mod operation;
mod path;
pub mod transport;

pub use client::ApiClient;
pub use error::Error;
pub use fetcher::HttpFetcher;
pub use operation::HttpOperation;
pub use transport::{TlsMode, TransportConfig};

pub use reqwest::Method;
