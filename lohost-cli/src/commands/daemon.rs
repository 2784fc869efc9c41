//! `lohost daemon`: run, stop, and inspect the routing daemon.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use lohost_core::DaemonConfig;
use lohost_daemon::paths::daemon_log_path;
use lohost_daemon::{start_blocking, ControlClient, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Print health and configuration of the running daemon as JSON.
    Status,
    /// Print recent lines of the detached daemon's log.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

pub fn run(command: DaemonCommand, config: DaemonConfig) -> Result<()> {
    match command {
        DaemonCommand::Start => start(config),
        DaemonCommand::Stop => {
            let client = ControlClient::for_config(&config);
            match super::block_on(client.stop())? {
                Ok(()) => println!("daemon stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
                Err(err) => return Err(err).context("failed to stop daemon"),
            }
            Ok(())
        }
        DaemonCommand::Status => status(&config),
        DaemonCommand::Logs(args) => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            print_tail(&daemon_log_path(&home), args.lines)
                .context("failed to read daemon log")
        }
    }
}

fn start(config: DaemonConfig) -> Result<()> {
    match start_blocking(config) {
        Ok(()) => Ok(()),
        Err(DaemonError::PortInUse { port }) => anyhow::bail!(
            "port {port} is already in use; another lohost daemon may be running \
             (see `lohost daemon status`)"
        ),
        Err(err) => Err(err).context("daemon exited with error"),
    }
}

fn status(config: &DaemonConfig) -> Result<()> {
    let client = ControlClient::for_config(config);
    let report = super::block_on(async {
        let health = client.health().await?;
        let config = client.config().await?;
        Ok::<_, DaemonError>((health, config))
    })?;

    let payload = match report {
        Ok((health, daemon_config)) => serde_json::json!({
            "running": true,
            "health": health,
            "config": daemon_config,
        }),
        Err(DaemonError::DaemonNotRunning { addr }) => serde_json::json!({
            "running": false,
            "addr": addr.to_string(),
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
    );
    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
