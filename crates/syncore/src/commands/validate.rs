//! Payload validation against declared schemas.

use std::fmt::Write;

use syncore_core::ValidationReport;

use crate::cli::{GlobalOpts, ValidateArgs};
use crate::config::Config;
use crate::error::CliError;
use crate::output;

use super::util;

fn describe(report: &ValidationReport, color: bool) -> String {
    if report.is_valid() {
        return output::status_label("valid", true, color);
    }
    let mut out = output::status_label("invalid", false, color);
    for (path, messages) in report.errors() {
        for message in messages {
            let _ = write!(out, "\n  {path}: {message}");
        }
    }
    out
}

pub async fn handle(cfg: &Config, args: ValidateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let registry = cfg.schema_registry()?;
    let payload = util::read_json_input(&args.file)?;
    let report = registry.validate_async(&args.schema, &payload).await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| describe(r, color),
        |r| r.errors().keys().cloned().collect::<Vec<_>>().join("\n"),
    );
    output::print_output(&out, global.quiet);

    if report.is_valid() {
        Ok(())
    } else {
        Err(CliError::InvalidPayload {
            schema: args.schema,
            count: report.error_count(),
        })
    }
}
