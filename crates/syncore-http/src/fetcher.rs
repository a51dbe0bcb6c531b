// ── HTTP fetcher ──
//
// Maps a cache key to `GET {base}/{path}?{params}`. By default the path is
// the query name with dots turned into slashes (`ref.pays` -> `ref/pays`);
// explicit routes may embed key params as `:name` path segments.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use syncore_core::{CacheKey, CoreError, Fetcher, PathTemplate};

use crate::client::ApiClient;
use crate::error::Error;
use crate::path;

/// [`Fetcher`] backed by a JSON REST API.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Arc<ApiClient>,
    routes: HashMap<String, PathTemplate>,
}

impl HttpFetcher {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            routes: HashMap::new(),
        }
    }

    /// Serve `query` from `template`, e.g. `("facture", "/factures/:id")`.
    /// Params used in the path are not repeated in the query string.
    pub fn route(mut self, query: impl Into<String>, template: &str) -> Result<Self, CoreError> {
        self.routes.insert(query.into(), PathTemplate::parse(template)?);
        Ok(self)
    }

    /// Path and query-string pairs for `key`.
    pub fn request_for(&self, key: &CacheKey) -> Result<(String, Vec<(String, String)>), Error> {
        let Some(template) = self.routes.get(key.query()) else {
            return Ok((key.query().replace('.', "/"), key.query_pairs()));
        };

        let path = path::fill(template, key.query_pairs())?;
        let used: Vec<&str> = template.params().collect();
        let rest = key
            .query_pairs()
            .into_iter()
            .filter(|(name, _)| !used.contains(&name.as_str()))
            .collect();
        Ok((path, rest))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, key: &CacheKey) -> BoxFuture<'static, Result<Value, CoreError>> {
        let client = Arc::clone(&self.client);
        let request = self.request_for(key);
        async move {
            let (path, params) = request?;
            Ok(client.get(&path, &params).await?)
        }
        .boxed()
    }
}
