// ── Mutation pipeline ──
//
// All write operations flow through `MutationPipeline::execute`:
// validate -> optimistic write -> operation (exactly once) -> invalidate
// on success, or roll back on failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::store::{KeyMatcher, QueryCache, RollbackToken};
use crate::validation::SchemaRegistry;

/// Performs one server-side write.
///
/// Not assumed idempotent: the pipeline never retries it. Any
/// `Fn(Value) -> impl Future<Output = Result<Value, CoreError>>` closure
/// qualifies.
pub trait Operation: Send + Sync + 'static {
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value, CoreError>>;
}

impl<F, Fut> Operation for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value, CoreError>> {
        (self)(payload).boxed()
    }
}

type OptimisticFn = Arc<dyn Fn(&QueryCache, &Value) -> RollbackToken + Send + Sync>;

/// Declares one kind of write: what to call, which cache entries it
/// affects, how to pre-apply it, and which schema guards it.
#[derive(Clone)]
pub struct MutationSpec {
    name: String,
    operation: Arc<dyn Operation>,
    affects: Vec<KeyMatcher>,
    optimistic: Option<OptimisticFn>,
    schema: Option<String>,
}

impl MutationSpec {
    pub fn new(name: impl Into<String>, operation: impl Operation) -> Self {
        Self::shared(name, Arc::new(operation))
    }

    pub fn shared(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            affects: Vec::new(),
            optimistic: None,
            schema: None,
        }
    }

    /// Entries to invalidate after a successful write.
    #[must_use]
    pub fn affects(mut self, matcher: impl Into<KeyMatcher>) -> Self {
        self.affects.push(matcher.into());
        self
    }

    /// Pre-apply the write to the cache. The closure typically calls
    /// [`QueryCache::set_query_data`] and returns its token.
    #[must_use]
    pub fn optimistic(
        mut self,
        apply: impl Fn(&QueryCache, &Value) -> RollbackToken + Send + Sync + 'static,
    ) -> Self {
        self.optimistic = Some(Arc::new(apply));
        self
    }

    /// Validate payloads against a registered schema before writing.
    #[must_use]
    pub fn validate_with(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affected(&self) -> &[KeyMatcher] {
        &self.affects
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl fmt::Debug for MutationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationSpec")
            .field("name", &self.name)
            .field("affects", &self.affects)
            .field("optimistic", &self.optimistic.is_some())
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Executes writes and keeps the query cache consistent with them.
///
/// Cheaply cloneable. Concurrent `execute` calls are independent; each
/// applies its invalidation when its own operation completes.
#[derive(Clone)]
pub struct MutationPipeline {
    cache: QueryCache,
    schemas: Arc<SchemaRegistry>,
}

impl MutationPipeline {
    pub fn new(cache: QueryCache, schemas: Arc<SchemaRegistry>) -> Self {
        Self { cache, schemas }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub async fn execute(&self, spec: &MutationSpec, payload: Value) -> Result<Value, CoreError> {
        if let Some(schema) = &spec.schema {
            let report = self.schemas.validate_async(schema, &payload).await?;
            if !report.is_valid() {
                debug!(mutation = %spec.name, schema = %schema, fields = report.error_count(), "payload rejected");
                return Err(CoreError::Validation(report));
            }
        }

        let token = spec
            .optimistic
            .as_ref()
            .map_or_else(RollbackToken::empty, |apply| apply(&self.cache, &payload));

        match spec.operation.call(payload).await {
            Ok(data) => {
                drop(token);
                let invalidated: usize = spec
                    .affects
                    .iter()
                    .map(|m| self.cache.invalidate(m.clone()))
                    .sum();
                debug!(mutation = %spec.name, invalidated, "mutation applied");
                Ok(data)
            }
            Err(e) => {
                let restored = self.cache.rollback(token);
                warn!(mutation = %spec.name, restored, error = %e, "mutation failed; optimistic writes rolled back");
                Err(match e {
                    e @ CoreError::Mutation { .. } => e,
                    other => CoreError::mutation(&spec.name, other.to_string()),
                })
            }
        }
    }
}
