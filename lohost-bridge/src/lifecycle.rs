//! Make sure a daemon answers on the configured port, launching one if needed.
//!
//! ```text
//! Unknown ──health ok──▶ DaemonReachable
//!    │
//!    └─health failed──▶ Spawning ──poll ok──▶ Ready
//!                          │
//!                          └─attempts exhausted──▶ Failed
//! ```
//!
//! Two clients racing to launch a daemon both spawn one; the loser fails to
//! bind and exits, and both clients' polling converges on the survivor.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use lohost_core::DaemonConfig;
use lohost_daemon::log_rotation::rotate_daemon_log;
use lohost_daemon::paths::{daemon_log_path, logs_dir};
use lohost_daemon::ControlClient;

use crate::error::{io_err, BridgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unknown,
    DaemonReachable,
    Spawning,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Bound on each individual health check.
    pub health_timeout: Duration,
    /// Pause between polls while spawning.
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            max_attempts: 50,
        }
    }
}

/// Starts a daemon process without waiting for it.
pub trait DaemonLauncher {
    fn launch(&self) -> Result<(), BridgeError>;
}

/// Re-executes `executable daemon start` as a detached process group with the
/// configuration passed through `LOHOST_*` variables.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    executable: PathBuf,
    config: DaemonConfig,
    home: Option<PathBuf>,
}

impl DetachedLauncher {
    /// `home` locates `~/.lohost/logs`; without it daemon output is discarded.
    pub fn new(executable: impl Into<PathBuf>, config: DaemonConfig, home: Option<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            config,
            home,
        }
    }

    /// Launch the currently running binary.
    pub fn current_exe(config: DaemonConfig, home: Option<PathBuf>) -> Result<Self, BridgeError> {
        let exe = std::env::current_exe().map_err(|e| io_err("locate current executable", e))?;
        Ok(Self::new(exe, config, home))
    }

    fn log_stdio(&self) -> Result<(Stdio, Stdio), BridgeError> {
        let Some(home) = &self.home else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let dir = logs_dir(home);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(format!("create {}", dir.display()), e))?;
        rotate_daemon_log(home);

        let path = daemon_log_path(home);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(format!("open {}", path.display()), e))?;
        let err_log = log
            .try_clone()
            .map_err(|e| io_err(format!("open {}", path.display()), e))?;
        Ok((Stdio::from(log), Stdio::from(err_log)))
    }
}

impl DaemonLauncher for DetachedLauncher {
    fn launch(&self) -> Result<(), BridgeError> {
        let (stdout, stderr) = self.log_stdio()?;
        let child = Command::new(&self.executable)
            .args(["daemon", "start"])
            .envs(self.config.to_env())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(BridgeError::Launch)?;
        tracing::info!(pid = child.id(), port = self.config.port, "launched lohost daemon");
        Ok(())
    }
}

/// Return once a daemon answers health checks at `client`'s address.
///
/// Yields [`LifecycleState::DaemonReachable`] if one was already running and
/// [`LifecycleState::Ready`] if `launcher` had to start it.
pub async fn ensure_daemon<L>(
    client: &ControlClient,
    launcher: &L,
    policy: &ReadinessPolicy,
) -> Result<LifecycleState, BridgeError>
where
    L: DaemonLauncher + ?Sized,
{
    let client = client.clone().with_timeout(policy.health_timeout);
    let mut state = LifecycleState::Unknown;

    match client.health().await {
        Ok(_) => {
            tracing::debug!(addr = %client.addr(), "daemon already running");
            return Ok(LifecycleState::DaemonReachable);
        }
        Err(err) => {
            tracing::debug!(addr = %client.addr(), error = %err, ?state, "daemon not reachable");
        }
    }

    launcher.launch()?;
    state = LifecycleState::Spawning;

    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.poll_interval).await;
        match client.health().await {
            Ok(_) => {
                tracing::debug!(attempt, ?state, "daemon ready");
                return Ok(LifecycleState::Ready);
            }
            Err(err) => tracing::trace!(attempt, error = %err, "daemon not ready yet"),
        }
    }

    state = LifecycleState::Failed;
    tracing::warn!(attempts = policy.max_attempts, ?state, "daemon never became ready");
    Err(BridgeError::StartupTimeout {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_constants() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.health_timeout, Duration::from_millis(500));
        assert_eq!(policy.poll_interval, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, 50);
    }

    #[test]
    fn launcher_without_home_discards_output() {
        let launcher = DetachedLauncher::new("/bin/true", DaemonConfig::default(), None);
        assert!(launcher.log_stdio().is_ok());
    }

    #[test]
    fn launcher_with_home_creates_log_file() {
        let home = tempfile::TempDir::new().expect("tempdir");
        let launcher = DetachedLauncher::new(
            "/bin/true",
            DaemonConfig::default(),
            Some(home.path().to_path_buf()),
        );
        launcher.log_stdio().expect("log stdio");
        assert!(daemon_log_path(home.path()).exists());
    }
}
