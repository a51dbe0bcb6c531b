// ── Route registry ──
//
// Immutable id -> descriptor table built once at start-up.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::template::{PathTemplate, RouteParams};
use crate::error::CoreError;

/// One navigable view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub id: String,
    pub path: PathTemplate,
    pub module: String,
    #[serde(default)]
    pub protected: bool,
    /// When non-empty, the user needs at least one of these roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl RouteDescriptor {
    pub fn new(id: &str, path: &str, module: &str) -> Result<Self, CoreError> {
        Ok(Self {
            id: id.to_owned(),
            path: PathTemplate::parse(path)?,
            module: module.to_owned(),
            protected: false,
            roles: Vec::new(),
        })
    }

    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Require one of `roles`. Implies `protected`.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self.protected = true;
        self
    }
}

/// Resolved route plus the parameters extracted from a concrete path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteDescriptor,
    pub params: RouteParams,
}

#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: IndexMap<String, RouteDescriptor>,
}

impl RouteRegistry {
    /// Build from a static table. Ids must be unique.
    pub fn from_table(table: impl IntoIterator<Item = RouteDescriptor>) -> Result<Self, CoreError> {
        let mut routes = IndexMap::new();
        for route in table {
            if routes.contains_key(&route.id) {
                return Err(CoreError::DuplicateRoute { id: route.id });
            }
            routes.insert(route.id.clone(), route);
        }
        Ok(Self { routes })
    }

    pub fn get(&self, id: &str) -> Option<&RouteDescriptor> {
        self.routes.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&RouteDescriptor, CoreError> {
        self.get(id).ok_or_else(|| CoreError::RouteNotFound {
            identifier: id.to_owned(),
        })
    }

    /// Find the route serving `path`. When several templates match, the one
    /// with more literal segments wins; ties go to declaration order.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        let mut best: Option<RouteMatch<'_>> = None;
        for route in self.routes.values() {
            let Some(params) = route.path.matches(path) else {
                continue;
            };
            let better = best
                .as_ref()
                .is_none_or(|b| route.path.specificity() > b.route.path.specificity());
            if better {
                best = Some(RouteMatch { route, params });
            }
        }
        best
    }

    /// Concrete path for route `id`.
    pub fn href(&self, id: &str, params: &RouteParams) -> Result<String, CoreError> {
        let route = self.require(id)?;
        route
            .path
            .render(params)
            .map_err(|param| CoreError::MissingParam {
                route: id.to_owned(),
                param,
            })
    }

    pub fn by_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a RouteDescriptor> + 'a {
        self.routes.values().filter(move |r| r.module == module)
    }

    /// Distinct module names in declaration order.
    pub fn modules(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for route in self.routes.values() {
            if !out.contains(&route.module.as_str()) {
                out.push(&route.module);
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
