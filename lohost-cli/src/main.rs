//! lohost: name local dev servers `http://<name>.localhost:8080`.
//!
//! # Usage
//!
//! ```text
//! lohost run <name> [--] <command>...
//! lohost list [--json]
//! lohost daemon start|stop|status|logs
//! ```
//!
//! `--port`, `--domain` and `--socket-dir` override `LOHOST_PORT`,
//! `LOHOST_DOMAIN` and `LOHOST_SOCKET_DIR` for every command.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{daemon::DaemonCommand, list::ListArgs, run::RunArgs};
use lohost_core::DaemonConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lohost",
    version,
    about = "Route <name>.localhost to local dev servers over Unix sockets",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command behind <name>.<domain>, with PORT set for it.
    Run(RunArgs),

    /// List services registered with the running daemon.
    List(ListArgs),

    /// Manage the lohost routing daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

/// Daemon settings shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Daemon port [env: LOHOST_PORT] [default: 8080].
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Routing domain [env: LOHOST_DOMAIN] [default: localhost].
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// Directory holding bridge sockets [env: LOHOST_SOCKET_DIR].
    #[arg(long, global = true)]
    pub socket_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Flag > environment > default.
    pub fn resolve(&self) -> Result<DaemonConfig> {
        DaemonConfig::from_env()
            .context("invalid LOHOST_* environment")?
            .with_overrides(self.port, self.domain.as_deref(), self.socket_dir.as_deref())
            .context("invalid command-line option")
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.global.resolve()?;
    match cli.command {
        Commands::Run(args) => {
            let outcome = args.run(config)?;
            outcome.exit()
        }
        Commands::List(args) => args.run(&config),
        Commands::Daemon { command } => commands::daemon::run(command, config),
    }
}
