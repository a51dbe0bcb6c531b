// ── Cache key identity ──
//
// A cache key is `(query name, params record)`. Identity is computed from a
// canonical rendering of the params with object keys sorted at every depth,
// so `{a:1,b:2}` and `{b:2,a:1}` address the same entry regardless of how
// serde_json orders its maps.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical identity for one cached query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "KeyParts", into = "KeyParts")]
pub struct CacheKey {
    query: String,
    params: Value,
    canonical: String,
}

#[derive(Serialize, Deserialize)]
struct KeyParts {
    query: String,
    #[serde(default)]
    params: Value,
}

impl From<KeyParts> for CacheKey {
    fn from(parts: KeyParts) -> Self {
        Self::new(parts.query, parts.params)
    }
}

impl From<CacheKey> for KeyParts {
    fn from(key: CacheKey) -> Self {
        Self {
            query: key.query,
            params: key.params,
        }
    }
}

impl CacheKey {
    /// Build a key from a query name and a params record.
    ///
    /// `null` params are normalised to an empty record.
    pub fn new(query: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let canonical = canonicalize(&params);
        Self {
            query: query.into(),
            params,
            canonical,
        }
    }

    /// A key with an empty params record.
    pub fn named(query: impl Into<String>) -> Self {
        Self::new(query, Value::Object(Map::new()))
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Look up a single top-level parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Canonical params rendering used for equality and hashing.
    pub fn canonical_params(&self) -> &str {
        &self.canonical
    }

    /// Top-level params as `(name, string value)` pairs, suitable for a
    /// query string. Nested values are rendered as compact JSON.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Value::Object(map) = &self.params else {
            return Vec::new();
        };
        let mut pairs: Vec<(String, String)> = map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => canonicalize(other),
                };
                (k.clone(), rendered)
            })
            .collect();
        pairs.sort();
        pairs
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.query == other.query && self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.query.hash(state);
        self.canonical.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.query, self.canonical)
    }
}

impl From<&str> for CacheKey {
    fn from(query: &str) -> Self {
        Self::named(query)
    }
}

impl From<(&str, Value)> for CacheKey {
    fn from((query, params): (&str, Value)) -> Self {
        Self::new(query, params)
    }
}

/// Render JSON with object keys sorted at every level.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        scalar => scalar.to_string(),
    }
}
