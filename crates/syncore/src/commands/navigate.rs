//! Navigation guard dry-run.

use syncore_core::{AuthState, DenyReason, NavigationOutcome};

use crate::cli::{GlobalOpts, NavigateArgs};
use crate::config::Config;
use crate::error::CliError;
use crate::output;

use super::util;

fn describe(outcome: &NavigationOutcome, color: bool) -> String {
    match outcome {
        NavigationOutcome::Allowed { target } => format!(
            "{} {} ({})",
            output::status_label("allowed", true, color),
            target.route,
            target.path
        ),
        NavigationOutcome::Redirected { to, path, return_to } => format!(
            "{} to {to} ({path})\nReturn to: {} ({})",
            output::status_label("redirected", false, color),
            return_to.route,
            return_to.path
        ),
        NavigationOutcome::Denied { target, reason } => format!(
            "{} {} ({})\nReason: {}",
            output::status_label("denied", false, color),
            target.route,
            target.path,
            reason_text(reason)
        ),
    }
}

fn reason_text(reason: &DenyReason) -> String {
    match reason {
        DenyReason::Unauthenticated => "not signed in".into(),
        DenyReason::MissingRole { required } => format!("needs one of: {}", required.join(", ")),
    }
}

pub fn handle(cfg: &Config, args: NavigateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let guard = cfg.navigation_guard()?;

    let auth = if args.authenticated || !args.roles.is_empty() {
        AuthState::authenticated(args.roles)
    } else {
        AuthState::anonymous()
    };

    let outcome = if args.target.starts_with('/') {
        guard.check_path(&args.target, &auth)?
    } else {
        guard.check(&args.target, &util::route_params(&args.params), &auth)?
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &outcome,
        |o| describe(o, color),
        |o| o.destination().unwrap_or_default().to_owned(),
    );
    output::print_output(&out, global.quiet);

    match outcome {
        NavigationOutcome::Denied { target, reason } => Err(CliError::Denied {
            route: target.route,
            reason: reason_text(&reason),
        }),
        _ => Ok(()),
    }
}
