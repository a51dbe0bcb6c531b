//! Command dispatch: bridges CLI args -> syncore client -> output formatting.

pub mod config_cmd;
pub mod fetch;
pub mod navigate;
pub mod routes;
pub mod util;
pub mod validate;

use clap::CommandFactory;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::config;
use crate::error::CliError;

/// Dispatch a command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        // Neither needs the configuration to load
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "syncore", &mut std::io::stdout());
            Ok(())
        }
        Command::Config(args) => config_cmd::handle(args, global),

        cmd => {
            let cfg = config::load(global)?;
            match cmd {
                Command::Routes(args) => routes::handle(&cfg, args, global),
                Command::Navigate(args) => navigate::handle(&cfg, args, global),
                Command::Validate(args) => validate::handle(&cfg, args, global).await,
                Command::Fetch(args) => fetch::handle(&cfg, args, global).await,
                Command::Config(_) | Command::Completions(_) => Ok(()),
            }
        }
    }
}
