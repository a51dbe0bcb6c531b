// ── Fetch capability ──

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::key::CacheKey;
use crate::error::CoreError;

/// Loads the server-side value for a cache key.
///
/// Implementations must be safe to invoke repeatedly for the same key.
/// Any `Fn(CacheKey) -> impl Future<Output = Result<Value, CoreError>>`
/// closure qualifies.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, key: &CacheKey) -> BoxFuture<'static, Result<Value, CoreError>>;
}

impl<F, Fut> Fetcher for F
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    fn fetch(&self, key: &CacheKey) -> BoxFuture<'static, Result<Value, CoreError>> {
        (self)(key.clone()).boxed()
    }
}
