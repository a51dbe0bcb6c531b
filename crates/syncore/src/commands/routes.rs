//! Route table command handlers.

use tabled::Tabled;

use syncore_core::RouteDescriptor;

use crate::cli::{GlobalOpts, RoutesArgs, RoutesCommand};
use crate::config::Config;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Protected")]
    protected: String,
    #[tabled(rename = "Roles")]
    roles: String,
}

impl From<&RouteDescriptor> for RouteRow {
    fn from(r: &RouteDescriptor) -> Self {
        Self {
            id: r.id.clone(),
            path: r.path.to_string(),
            module: r.module.clone(),
            protected: if r.protected { "yes" } else { "no" }.into(),
            roles: r.roles.join(", "),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(cfg: &Config, args: RoutesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let registry = cfg.route_registry()?;

    match args.command {
        RoutesCommand::List { module } => {
            let routes: Vec<RouteDescriptor> = match module {
                Some(ref m) => registry.by_module(m).cloned().collect(),
                None => registry.iter().cloned().collect(),
            };
            let out = output::render_list(
                &global.output,
                &routes,
                |r| RouteRow::from(r),
                |r| r.id.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        RoutesCommand::Resolve { path } => {
            let matched = registry.resolve(&path).ok_or_else(|| CliError::NotFound {
                resource_type: "route for path".into(),
                identifier: path.clone(),
                list_command: "routes list".into(),
            })?;

            let detail = serde_json::json!({
                "route": matched.route,
                "params": matched.params,
            });
            let out = output::render_single(
                &global.output,
                &detail,
                |_| {
                    let params = matched
                        .params
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    format!(
                        "{} ({}) in module {}\nParams: {}",
                        matched.route.id,
                        matched.route.path,
                        matched.route.module,
                        if params.is_empty() { "-" } else { params.as_str() }
                    )
                },
                |_| matched.route.id.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
