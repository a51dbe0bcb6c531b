//! Clap derive structures for the `syncore` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// syncore -- inspect routes, validate payloads and query the API cache
#[derive(Debug, Parser)]
#[command(
    name = "syncore",
    version,
    about = "Inspect syncore routes, schemas and queries from the command line",
    long_about = "Loads the same TOML configuration a syncore client uses and exercises it:\n\
        resolve routes, dry-run the navigation guard, validate JSON payloads\n\
        against declared schemas and fetch queries through the cache.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "SYNCORE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// API base URL (overrides [api] base_url)
    #[arg(long, short = 'u', env = "SYNCORE_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// API bearer token
    #[arg(long, env = "SYNCORE_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SYNCORE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides [api] timeout_secs)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect the route table
    #[command(alias = "r")]
    Routes(RoutesArgs),

    /// Dry-run the navigation guard for a route id or path
    #[command(alias = "nav")]
    Navigate(NavigateArgs),

    /// Validate a JSON payload against a declared schema
    Validate(ValidateArgs),

    /// Fetch a query through the cache and the HTTP API
    Fetch(FetchArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Routes ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RoutesArgs {
    #[command(subcommand)]
    pub command: RoutesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RoutesCommand {
    /// List declared routes
    #[command(alias = "ls")]
    List {
        /// Only routes belonging to this module
        #[arg(long, short = 'm')]
        module: Option<String>,
    },

    /// Find the route serving a concrete path
    Resolve {
        /// Path such as /factures/42
        path: String,
    },
}

// ── Navigate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct NavigateArgs {
    /// Route id, or a path starting with '/'
    pub target: String,

    /// Route parameters for a route id (key=value, repeatable)
    #[arg(long = "param", short = 'P', value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Treat the user as signed in
    #[arg(long, short = 'a')]
    pub authenticated: bool,

    /// Role held by the user (repeatable; implies --authenticated)
    #[arg(long = "role", short = 'r')]
    pub roles: Vec<String>,
}

// ── Validate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Registered schema name
    pub schema: String,

    /// JSON file to validate ('-' reads stdin)
    pub file: PathBuf,
}

// ── Fetch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Query name, e.g. ref.pays or facture
    pub query: String,

    /// Query parameter (key=value, repeatable). Values that parse as JSON
    /// are sent typed; anything else is a string.
    #[arg(long = "param", short = 'P', value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration (secrets redacted)
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

// ── Value parsers ────────────────────────────────────────────────────

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn key_value_params() {
        assert_eq!(parse_key_val("id=42"), Ok(("id".into(), "42".into())));
        assert_eq!(parse_key_val("q=a=b"), Ok(("q".into(), "a=b".into())));
        assert!(parse_key_val("id").is_err());
        assert!(parse_key_val("=1").is_err());
    }
}
