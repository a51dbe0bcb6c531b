// ── Path templates ──

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Named path parameters, e.g. `{"id": "42"}` for `/factures/:id`.
pub type RouteParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A route path such as `/factures/:id/lignes`.
///
/// Segments starting with `:` are named parameters that match any single
/// non-empty path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidTemplate {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };

        if !template.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let mut segments = Vec::new();
        for part in split(template) {
            if part.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid(&format!("invalid parameter name '{name}'")));
                }
                if segments.contains(&Segment::Param(name.to_owned())) {
                    return Err(invalid(&format!("duplicate parameter '{name}'")));
                }
                segments.push(Segment::Param(name.to_owned()));
            } else {
                segments.push(Segment::Literal(part.to_owned()));
            }
        }

        Ok(Self {
            raw: template.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names in declaration order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Number of literal segments; more literals means a more specific route.
    pub(crate) fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Match a concrete path, extracting parameters. A trailing slash and a
    /// query string or fragment are ignored.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = RouteParams::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Param(name) if !part.is_empty() => {
                    params.insert(name.clone(), part.to_owned());
                }
                _ => return None,
            }
        }
        Some(params)
    }

    /// Build a concrete path. Extra parameters are ignored.
    pub fn render(&self, params: &RouteParams) -> Result<String, String> {
        if self.segments.is_empty() {
            return Ok("/".to_owned());
        }
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Param(name) => match params.get(name) {
                    Some(value) if !value.is_empty() => out.push_str(value),
                    _ => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}

/// Path segments with the leading and any trailing slash removed.
fn split(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PathTemplate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathTemplate {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathTemplate> for String {
    fn from(template: PathTemplate) -> Self {
        template.raw
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> RouteParams {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn extracts_named_params() {
        let t = PathTemplate::parse("/factures/:id/lignes/:ligne").unwrap();
        assert_eq!(
            t.matches("/factures/42/lignes/3/"),
            Some(params(&[("id", "42"), ("ligne", "3")]))
        );
        assert_eq!(t.matches("/factures/42"), None);
        assert_eq!(t.matches("/devis/42/lignes/3"), None);
        assert_eq!(t.params().collect::<Vec<_>>(), ["id", "ligne"]);
    }

    #[test]
    fn root_and_query_strings() {
        let root = PathTemplate::parse("/").unwrap();
        assert_eq!(root.matches("/"), Some(RouteParams::new()));
        assert_eq!(root.render(&RouteParams::new()).unwrap(), "/");

        let t = PathTemplate::parse("/clients").unwrap();
        assert!(t.matches("/clients?page=2#top").is_some());
    }

    #[test]
    fn renders_and_reports_missing_params() {
        let t = PathTemplate::parse("/factures/:id").unwrap();
        assert_eq!(t.render(&params(&[("id", "7"), ("x", "y")])).unwrap(), "/factures/7");
        assert_eq!(t.render(&RouteParams::new()).unwrap_err(), "id");
    }

    #[test]
    fn rejects_malformed_templates() {
        for bad in ["factures", "/a//b", "/a/:", "/a/:x-y", "/a/:id/:id"] {
            assert!(
                matches!(PathTemplate::parse(bad), Err(CoreError::InvalidTemplate { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn serde_uses_the_raw_string() {
        let t: PathTemplate = serde_json::from_str(r#""/devises/:code""#).unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""/devises/:code""#);
        assert!(serde_json::from_str::<PathTemplate>(r#""devises""#).is_err());
    }
}
