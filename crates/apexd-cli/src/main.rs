mod commands;
mod context;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use apexd_core::{ApexdConfig, DEFAULT_CONFIG_PATH};
use apexd_session::SessionState;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;

use crate::commands::{run_cli, write_completions};

#[derive(Parser, Debug)]
#[command(name = "apexctl")]
#[command(about = "Inspect and maintain apexd activation state", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Print the sessions root selected for this device.
    SessionsDir,
    #[command(subcommand)]
    Hashtree(HashtreeCommand),
    Completion {
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    List {
        #[arg(long, value_parser = parse_session_state)]
        state: Option<SessionState>,
    },
    Show {
        id: i32,
    },
    DeleteFinalized,
    /// Move sessions from an older root into the selected one.
    Migrate {
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum HashtreeCommand {
    /// Reuse or regenerate the hashtree side file of an extracted bundle.
    Prepare {
        bundle: PathBuf,
        #[arg(long)]
        target: Option<PathBuf>,
    },
    Remove {
        package: String,
    },
}

fn parse_session_state(value: &str) -> Result<SessionState, String> {
    value
        .parse::<SessionState>()
        .map_err(|err| err.to_string())
}

fn init_logging(default_level: &str) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Commands::Completion { shell } = cli.command {
        return write_completions(shell, &mut std::io::stdout());
    }

    let config = ApexdConfig::load(&cli.config)?;
    init_logging(&config.log_level);
    run_cli(cli, config)
}
