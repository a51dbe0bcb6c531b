// ── Navigation guard ──
//
// Stateless access decision for each navigation attempt. Reads the route
// table and the current auth state; never mutates either.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::registry::{RouteDescriptor, RouteRegistry};
use super::template::RouteParams;
use crate::error::CoreError;

/// Authentication snapshot supplied by the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub authenticated: bool,
    pub roles: BTreeSet<String>,
}

impl AuthState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authenticated: true,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_any_role(&self, required: &[String]) -> bool {
        required.iter().any(|r| self.roles.contains(r))
    }
}

/// Source of the auth state, read synchronously at decision time.
pub trait AuthProvider {
    fn auth_state(&self) -> AuthState;
}

impl AuthProvider for AuthState {
    fn auth_state(&self) -> AuthState {
        self.clone()
    }
}

/// Live auth state published by the host's session layer.
impl AuthProvider for watch::Receiver<AuthState> {
    fn auth_state(&self) -> AuthState {
        self.borrow().clone()
    }
}

impl<T: AuthProvider + ?Sized> AuthProvider for Arc<T> {
    fn auth_state(&self) -> AuthState {
        (**self).auth_state()
    }
}

/// A concrete navigation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationTarget {
    pub route: String,
    pub params: RouteParams,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::Display)]
#[serde(tag = "reason", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DenyReason {
    Unauthenticated,
    MissingRole { required: Vec<String> },
}

/// Terminal decision for one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationOutcome {
    Allowed {
        target: NavigationTarget,
    },
    Denied {
        target: NavigationTarget,
        reason: DenyReason,
    },
    /// Send the user to the fallback route; `return_to` is the originally
    /// requested target so the fallback flow can resume it.
    Redirected {
        to: String,
        path: String,
        return_to: NavigationTarget,
    },
}

impl NavigationOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Route id the view layer should mount next, if any.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Allowed { target } => Some(&target.route),
            Self::Redirected { to, .. } => Some(to),
            Self::Denied { .. } => None,
        }
    }
}

/// Decides whether a navigation request may proceed.
#[derive(Debug, Clone)]
pub struct NavigationGuard {
    routes: Arc<RouteRegistry>,
    fallback: Option<String>,
}

impl NavigationGuard {
    pub fn new(routes: Arc<RouteRegistry>) -> Self {
        Self {
            routes,
            fallback: None,
        }
    }

    /// Redirect unauthenticated users to route `id` (typically the login
    /// view). The fallback must exist, must not itself be protected and
    /// must take no path parameters, since redirects carry none.
    pub fn with_fallback(mut self, id: &str) -> Result<Self, CoreError> {
        let route = self.routes.require(id)?;
        if route.protected {
            return Err(CoreError::Config {
                message: format!("fallback route '{id}' must not be protected"),
            });
        }
        if let Some(param) = route.path.params().next() {
            return Err(CoreError::Config {
                message: format!("fallback route '{id}' must not take parameters (found ':{param}')"),
            });
        }
        self.fallback = Some(id.to_owned());
        Ok(self)
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    /// Decide access to route `id` with `params`.
    pub fn check(
        &self,
        id: &str,
        params: &RouteParams,
        auth: &(impl AuthProvider + ?Sized),
    ) -> Result<NavigationOutcome, CoreError> {
        let route = self.routes.require(id)?;
        let target = NavigationTarget {
            route: route.id.clone(),
            params: params.clone(),
            path: self.routes.href(id, params)?,
        };
        self.decide(route, target, &auth.auth_state())
    }

    /// Decide access to a concrete path.
    pub fn check_path(
        &self,
        path: &str,
        auth: &(impl AuthProvider + ?Sized),
    ) -> Result<NavigationOutcome, CoreError> {
        let matched = self
            .routes
            .resolve(path)
            .ok_or_else(|| CoreError::RouteNotFound {
                identifier: path.to_owned(),
            })?;
        let target = NavigationTarget {
            route: matched.route.id.clone(),
            path: self.routes.href(&matched.route.id, &matched.params)?,
            params: matched.params,
        };
        self.decide(matched.route, target, &auth.auth_state())
    }

    fn decide(
        &self,
        route: &RouteDescriptor,
        target: NavigationTarget,
        auth: &AuthState,
    ) -> Result<NavigationOutcome, CoreError> {
        let outcome = if !route.protected {
            NavigationOutcome::Allowed { target }
        } else if !auth.authenticated {
            match &self.fallback {
                Some(fallback) => NavigationOutcome::Redirected {
                    to: fallback.clone(),
                    path: self.routes.href(fallback, &RouteParams::new())?,
                    return_to: target,
                },
                None => NavigationOutcome::Denied {
                    target,
                    reason: DenyReason::Unauthenticated,
                },
            }
        } else if route.roles.is_empty() || auth.has_any_role(&route.roles) {
            NavigationOutcome::Allowed { target }
        } else {
            NavigationOutcome::Denied {
                target,
                reason: DenyReason::MissingRole {
                    required: route.roles.clone(),
                },
            }
        };

        debug!(route = %route.id, outcome = ?outcome.destination(), allowed = outcome.is_allowed(), "navigation checked");
        Ok(outcome)
    }
}
