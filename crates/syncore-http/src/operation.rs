// ── HTTP mutation operations ──

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;
use syncore_core::{CoreError, Operation, PathTemplate};

use crate::client::ApiClient;
use crate::error::Error;
use crate::path;

/// [`Operation`] that sends the payload as a JSON request.
///
/// `:name` segments in the path are filled from the payload's top-level
/// scalar fields, so `PUT /devises/:id` works with `{"id": 3, ...}`.
#[derive(Debug, Clone)]
pub struct HttpOperation {
    client: Arc<ApiClient>,
    method: Method,
    path: PathTemplate,
}

impl HttpOperation {
    pub fn new(client: Arc<ApiClient>, method: Method, path: &str) -> Result<Self, CoreError> {
        Ok(Self {
            client,
            method,
            path: PathTemplate::parse(path)?,
        })
    }

    pub fn post(client: Arc<ApiClient>, path: &str) -> Result<Self, CoreError> {
        Self::new(client, Method::POST, path)
    }

    pub fn put(client: Arc<ApiClient>, path: &str) -> Result<Self, CoreError> {
        Self::new(client, Method::PUT, path)
    }

    pub fn patch(client: Arc<ApiClient>, path: &str) -> Result<Self, CoreError> {
        Self::new(client, Method::PATCH, path)
    }

    pub fn delete(client: Arc<ApiClient>, path: &str) -> Result<Self, CoreError> {
        Self::new(client, Method::DELETE, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    fn render_path(&self, payload: &Value) -> Result<String, Error> {
        let params = self.path.params().filter_map(|name| {
            let value = match payload.get(name)? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((name.to_owned(), value))
        });
        path::fill(&self.path, params)
    }
}

impl Operation for HttpOperation {
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value, CoreError>> {
        let client = Arc::clone(&self.client);
        let method = self.method.clone();
        let path = self.render_path(&payload);
        async move {
            let path = path?;
            Ok(client.send(method, &path, &payload).await?)
        }
        .boxed()
    }
}
