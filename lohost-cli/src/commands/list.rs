//! `lohost list`: what the daemon is currently routing.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use lohost_core::DaemonConfig;
use lohost_daemon::{ControlClient, DaemonError, ServiceEntry};

/// Arguments for `lohost list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "port")]
    port: u16,
    #[tabled(rename = "socket")]
    socket: String,
    #[tabled(rename = "since")]
    since: String,
}

impl ListArgs {
    pub fn run(self, config: &DaemonConfig) -> Result<()> {
        let client = ControlClient::for_config(config);
        let services = match super::block_on(client.services())? {
            Ok(services) => services,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    println!("[]");
                } else {
                    println!("lohost daemon is not running on port {}.", config.port);
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to list services"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&services).context("failed to serialize services")?
            );
            return Ok(());
        }

        print_table(config, services);
        Ok(())
    }
}

fn print_table(config: &DaemonConfig, services: Vec<ServiceEntry>) {
    println!(
        "lohost v{} | port {} | *.{} | {} services",
        env!("CARGO_PKG_VERSION"),
        config.port,
        config.route_domain,
        services.len(),
    );
    if services.is_empty() {
        println!("No services registered. Start one with `lohost run <name> -- <command>`.");
        return;
    }

    let rows: Vec<ServiceRow> = services
        .into_iter()
        .map(|entry| ServiceRow {
            name: entry.name.bold().to_string(),
            url: entry.url.cyan().to_string(),
            port: entry.port,
            socket: entry.socket_path.display().to_string(),
            since: entry
                .registered_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
