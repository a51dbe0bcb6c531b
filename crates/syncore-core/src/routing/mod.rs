// ── Routing ──
//
// Static route table plus the navigation guard that gates protected
// views on the host's authentication state.

mod guard;
mod registry;
mod template;

pub use guard::{AuthProvider, AuthState, DenyReason, NavigationGuard, NavigationOutcome, NavigationTarget};
pub use registry::{RouteDescriptor, RouteMatch, RouteRegistry};
pub use template::{PathTemplate, RouteParams};
