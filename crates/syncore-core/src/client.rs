// ── Client facade ──
//
// Owns the query cache, mutation pipeline, schema and route registries,
// the navigation guard and the current auth state. One per application.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::command::{MutationPipeline, MutationSpec};
use crate::config::{CacheConfig, QueryOptions};
use crate::error::CoreError;
use crate::routing::{
    AuthState, NavigationGuard, NavigationOutcome, RouteDescriptor, RouteParams, RouteRegistry,
};
use crate::store::{CacheKey, Fetcher, KeyMatcher, QueryCache};
use crate::stream::Subscription;
use crate::validation::{Schema, SchemaRegistry, ValidationReport};

// ── Builder ──────────────────────────────────────────────────────

/// Assembles a [`Client`] from its static tables.
#[derive(Default)]
pub struct ClientBuilder {
    cache: CacheConfig,
    schemas: SchemaRegistry,
    routes: Vec<RouteDescriptor>,
    fallback: Option<String>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl ClientBuilder {
    #[must_use]
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Fetcher used by [`Client::query`] and [`Client::fetch`].
    #[must_use]
    pub fn fetcher(mut self, fetcher: impl Fetcher) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    #[must_use]
    pub fn shared_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn routes(mut self, routes: impl IntoIterator<Item = RouteDescriptor>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Route unauthenticated users are redirected to.
    #[must_use]
    pub fn login_route(mut self, id: impl Into<String>) -> Self {
        self.fallback = Some(id.into());
        self
    }

    pub fn schema(mut self, schema: Schema) -> Result<Self, CoreError> {
        self.schemas.register(schema)?;
        Ok(self)
    }

    #[must_use]
    pub fn schemas(mut self, registry: SchemaRegistry) -> Self {
        self.schemas = registry;
        self
    }

    pub fn build(self) -> Result<Client, CoreError> {
        let routes = Arc::new(RouteRegistry::from_table(self.routes)?);
        let mut guard = NavigationGuard::new(Arc::clone(&routes));
        if let Some(fallback) = &self.fallback {
            guard = guard.with_fallback(fallback)?;
        }

        let schemas = Arc::new(self.schemas);
        let cache = QueryCache::new(self.cache);
        let pipeline = MutationPipeline::new(cache.clone(), Arc::clone(&schemas));
        let (auth, _) = watch::channel(AuthState::anonymous());

        info!(
            routes = routes.len(),
            schemas = schemas.len(),
            fallback = ?self.fallback,
            "client ready"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                cache,
                pipeline,
                schemas,
                routes,
                guard,
                auth,
                fetcher: self.fetcher,
            }),
        })
    }
}

// ── Client ───────────────────────────────────────────────────────

/// The main entry point for a view layer.
///
/// Cheaply cloneable via `Arc<ClientInner>`.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    cache: QueryCache,
    pipeline: MutationPipeline,
    schemas: Arc<SchemaRegistry>,
    routes: Arc<RouteRegistry>,
    guard: NavigationGuard,
    auth: watch::Sender<AuthState>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn pipeline(&self) -> &MutationPipeline {
        &self.inner.pipeline
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.inner.routes
    }

    pub fn guard(&self) -> &NavigationGuard {
        &self.inner.guard
    }

    // ── Queries ──────────────────────────────────────────────────

    fn default_fetcher(&self) -> Result<Arc<dyn Fetcher>, CoreError> {
        self.inner.fetcher.clone().ok_or_else(|| CoreError::Config {
            message: "no default fetcher configured".into(),
        })
    }

    /// Subscribe to `key` with the default fetcher and options.
    pub fn query(&self, key: impl Into<CacheKey>) -> Result<Subscription, CoreError> {
        self.query_with(key, self.inner.cache.options())
    }

    pub fn query_with(
        &self,
        key: impl Into<CacheKey>,
        options: QueryOptions,
    ) -> Result<Subscription, CoreError> {
        let fetcher = self.default_fetcher()?;
        Ok(self.inner.cache.subscribe_shared(key, fetcher, options))
    }

    /// One-shot read through the cache with the default fetcher.
    pub async fn fetch(&self, key: impl Into<CacheKey>) -> Result<Arc<Value>, CoreError> {
        let fetcher = self.default_fetcher()?;
        self.inner
            .cache
            .fetch_shared(key, fetcher, self.inner.cache.options())
            .await
    }

    pub fn invalidate(&self, matcher: impl Into<KeyMatcher>) -> usize {
        self.inner.cache.invalidate(matcher)
    }

    // ── Writes & validation ──────────────────────────────────────

    pub async fn execute(&self, spec: &MutationSpec, payload: Value) -> Result<Value, CoreError> {
        self.inner.pipeline.execute(spec, payload).await
    }

    pub fn validate(&self, schema: &str, value: &Value) -> Result<ValidationReport, CoreError> {
        self.inner.schemas.validate(schema, value)
    }

    pub async fn validate_async(&self, schema: &str, value: &Value) -> Result<ValidationReport, CoreError> {
        self.inner.schemas.validate_async(schema, value).await
    }

    // ── Session & navigation ─────────────────────────────────────

    /// Publish a new auth state (login, logout, role change).
    pub fn set_auth(&self, state: AuthState) {
        self.inner.auth.send_replace(state);
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.auth.borrow().clone()
    }

    /// Watch auth state changes.
    pub fn watch_auth(&self) -> watch::Receiver<AuthState> {
        self.inner.auth.subscribe()
    }

    /// Check navigation to route `id` against the current auth state.
    pub fn navigate(&self, id: &str, params: &RouteParams) -> Result<NavigationOutcome, CoreError> {
        self.inner.guard.check(id, params, &self.auth_state())
    }

    pub fn navigate_path(&self, path: &str) -> Result<NavigationOutcome, CoreError> {
        self.inner.guard.check_path(path, &self.auth_state())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Abandon in-flight fetches and evict every cache entry.
    pub fn shutdown(&self) {
        self.inner.cache.shutdown();
        info!("client shut down");
    }
}
