// ── Key predicates ──
//
// Used by invalidation and mutation specs to address a set of entries
// without naming every key.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::key::CacheKey;

/// Selects cache entries by key.
#[derive(Clone)]
pub enum KeyMatcher {
    /// Every entry.
    All,
    /// Exactly this key.
    Exact(CacheKey),
    /// Every key with this query name, whatever the params.
    Query(String),
    /// Keys of this query whose params contain every top-level field of
    /// `subset` with an equal value.
    QueryWith { query: String, subset: Value },
    Custom(Arc<dyn Fn(&CacheKey) -> bool + Send + Sync>),
}

impl KeyMatcher {
    pub fn query(name: impl Into<String>) -> Self {
        Self::Query(name.into())
    }

    pub fn query_with(name: impl Into<String>, subset: Value) -> Self {
        Self::QueryWith {
            query: name.into(),
            subset,
        }
    }

    pub fn custom(f: impl Fn(&CacheKey) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::All => true,
            Self::Exact(k) => k == key,
            Self::Query(q) => key.query() == q,
            Self::QueryWith { query, subset } => {
                key.query() == query && params_contain(key.params(), subset)
            }
            Self::Custom(f) => f(key),
        }
    }
}

fn params_contain(params: &Value, subset: &Value) -> bool {
    match subset {
        Value::Object(wanted) => wanted
            .iter()
            .all(|(name, value)| params.get(name) == Some(value)),
        Value::Null => true,
        _ => false,
    }
}

impl fmt::Debug for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Exact(k) => f.debug_tuple("Exact").field(&k.to_string()).finish(),
            Self::Query(q) => f.debug_tuple("Query").field(q).finish(),
            Self::QueryWith { query, subset } => f
                .debug_struct("QueryWith")
                .field("query", query)
                .field("subset", subset)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<CacheKey> for KeyMatcher {
    fn from(key: CacheKey) -> Self {
        Self::Exact(key)
    }
}

impl From<&CacheKey> for KeyMatcher {
    fn from(key: &CacheKey) -> Self {
        Self::Exact(key.clone())
    }
}
