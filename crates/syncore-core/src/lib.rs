//! Data synchronization, navigation gating and form validation core for
//! modular business clients.
//!
//! An external view layer renders; this crate decides what data it shows,
//! which views it may mount and whether a write may proceed:
//!
//! - **[`QueryCache`]** - Keyed, subscriber-counted store of asynchronous
//!   fetch results (`DashMap` + per-entry `tokio::sync::watch` channels).
//!   Deduplicates concurrent fetches, retries with backoff, marks entries
//!   stale on invalidation and evicts unobserved entries after a grace
//!   period.
//!
//! - **[`Subscription`]** - One view's interest in a key. Exposes
//!   `current()` / `latest()` / `changed()` / `settled()`, converts into a
//!   `Stream`, or drives a callback listener. Dropping it disposes it.
//!
//! - **[`MutationPipeline`]** - Validate, optionally pre-apply, call the
//!   operation once, then invalidate affected keys or roll back.
//!
//! - **Validation** ([`validation`]) - Composable field [`Rule`]s grouped
//!   into named [`Schema`]s with nested, array and cross-field support.
//!
//! - **Routing** ([`routing`]) - Static [`RouteRegistry`] and the stateless
//!   [`NavigationGuard`].
//!
//! - **[`Client`]** - Facade owning all of the above for one application.

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod routing;
pub mod store;
pub mod stream;
pub mod validation;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{Client, ClientBuilder};
pub use command::{MutationPipeline, MutationSpec, Operation};
pub use config::{Backoff, CacheConfig, QueryOptions, RetryPolicy};
pub use error::CoreError;
pub use routing::{
    AuthProvider, AuthState, DenyReason, NavigationGuard, NavigationOutcome, NavigationTarget,
    PathTemplate, RouteDescriptor, RouteParams, RouteRegistry,
};
pub use store::{
    CacheEntry, CacheKey, FetchFailure, Fetcher, KeyMatcher, QueryCache, QueryStatus, RequestId,
    RollbackToken,
};
pub use stream::{EntryStream, Subscription};
pub use validation::{Rule, Schema, SchemaDefinition, SchemaRegistry, ValidationReport};
