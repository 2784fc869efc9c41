//! `lohost run`: expose a dev server under a name for as long as it runs.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use lohost_bridge::{
    dns_shim_from_env, BridgeError, DetachedLauncher, ExitOutcome, ReadinessPolicy, Session,
};
use lohost_core::{DaemonConfig, ServiceName};

/// Arguments for `lohost run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Name to route, e.g. `myapp` for http://myapp.localhost:8080.
    #[arg(value_parser = parse_service_name)]
    pub name: ServiceName,

    /// Command to run; it must listen on 127.0.0.1:$PORT.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn run(self, config: DaemonConfig) -> Result<ExitOutcome> {
        let home = dirs::home_dir();
        let launcher = DetachedLauncher::current_exe(config.clone(), home)
            .context("cannot re-launch lohost as a daemon")?;
        let dns_shim = dns_shim_from_env();

        super::block_on(async move {
            let started = Session::start(
                self.name.clone(),
                &config,
                &launcher,
                &ReadinessPolicy::default(),
            )
            .await;
            let session = match started {
                Ok(session) => session,
                Err(BridgeError::Interrupted { signal }) => return Ok(ExitOutcome::Signal(signal)),
                Err(err) => return Err(explain(err, &config)),
            };

            println!(
                "{} {} {}",
                "lohost".bold(),
                self.name.to_string().bright_black(),
                session.url().cyan().underline(),
            );

            session
                .run(&self.command, dns_shim.as_deref())
                .await
                .with_context(|| format!("failed to run `{}`", self.command.join(" ")))
        })?
    }
}

fn explain(err: BridgeError, config: &DaemonConfig) -> anyhow::Error {
    match err {
        BridgeError::StartupTimeout { .. } => anyhow::Error::new(err).context(format!(
            "no lohost daemon answered on port {}; check `lohost daemon logs`",
            config.port
        )),
        other => anyhow::Error::new(other).context("failed to set up the bridge"),
    }
}

fn parse_service_name(raw: &str) -> std::result::Result<ServiceName, String> {
    let name = raw.trim().trim_matches('.').to_ascii_lowercase();
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')))
    {
        return Err(format!("invalid character {bad:?}; use letters, digits, '-', '_' or '.'"));
    }
    if name.split('.').any(str::is_empty) {
        return Err("name must not contain empty labels".to_string());
    }
    Ok(ServiceName::from(name))
}
