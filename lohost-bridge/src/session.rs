//! One wrapped process, from registration to teardown.
//!
//! [`Session::start`] allocates a port, binds the bridge, makes sure a daemon
//! is running and registers the name. [`Session::run`] then spawns the
//! command with `PORT` set, forwards `SIGINT`/`SIGTERM` to it, and once it
//! exits deregisters and closes the bridge, in that order.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal as unix_signal, Signal as SignalStream, SignalKind};

use lohost_core::{DaemonConfig, RegisterRequest, ServiceName};
use lohost_daemon::ControlClient;

use crate::bridge::{allocate_port, BridgeHandle, SocketBridge};
use crate::error::{io_err, BridgeError};
use crate::lifecycle::{ensure_daemon, DaemonLauncher, ReadinessPolicy};

/// Path to the optional DNS shim library injected into the wrapped process.
pub const ENV_DNS_LIB: &str = "LOHOST_DNS_LIB";

#[cfg(target_os = "macos")]
const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
const PRELOAD_VAR: &str = "LD_PRELOAD";

/// How the wrapped process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(sig)) => Self::Signal(sig),
            (None, None) => Self::Code(1),
        }
    }
}

impl ExitOutcome {
    /// Leave the current process the same way the child did: exit with its
    /// code, or re-raise its signal with the default disposition.
    pub fn exit(self) -> ! {
        match self {
            Self::Code(code) => std::process::exit(code),
            Self::Signal(sig) => {
                if let Ok(signo) = Signal::try_from(sig) {
                    // SAFETY: restoring the default disposition installs no
                    // Rust handler; the process is about to terminate.
                    let reset = unsafe { signal::signal(signo, SigHandler::SigDfl) };
                    if reset.is_ok() {
                        let _ = signal::raise(signo);
                    }
                }
                std::process::exit(128 + sig)
            }
        }
    }
}

/// A live registration of one name with the daemon.
#[derive(Debug)]
pub struct Registration {
    client: ControlClient,
    name: ServiceName,
    url: String,
    active: bool,
}

impl Registration {
    pub async fn register(
        client: ControlClient,
        request: &RegisterRequest,
    ) -> Result<Self, BridgeError> {
        let url = client.register(request).await?;
        tracing::info!(name = %request.name, url = %url, "registered with daemon");
        Ok(Self {
            client,
            name: request.name.clone(),
            url,
            active: true,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Remove the name from the daemon. Only the first call sends a request;
    /// failures are logged and otherwise ignored.
    pub async fn deregister(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match self.client.deregister(self.name.as_str()).await {
            Ok(true) => tracing::info!(name = %self.name, "deregistered"),
            Ok(false) => tracing::debug!(name = %self.name, "name was already gone"),
            Err(err) => tracing::debug!(name = %self.name, error = %err, "deregister failed"),
        }
    }
}

/// A bridge registered with a running daemon, waiting for its process.
#[derive(Debug)]
pub struct Session {
    port: u16,
    bridge: BridgeHandle,
    registration: Registration,
    signals: ForwardedSignals,
}

impl Session {
    /// Bind the bridge, bring up the daemon and register `name`.
    ///
    /// A `SIGINT`/`SIGTERM` while waiting for the daemon aborts startup with
    /// [`BridgeError::Interrupted`]; nothing has been registered yet and the
    /// bridge is closed.
    pub async fn start<L>(
        name: ServiceName,
        config: &DaemonConfig,
        launcher: &L,
        policy: &ReadinessPolicy,
    ) -> Result<Self, BridgeError>
    where
        L: DaemonLauncher + ?Sized,
    {
        let port = allocate_port()?;
        let socket_path = config.socket_path_for(&name);
        // Installed before registering so no signal can skip deregistration.
        let mut signals = ForwardedSignals::install()?;
        let bridge = SocketBridge::bind(&socket_path, port)?.serve();

        let client = ControlClient::for_config(config);
        let ready = tokio::select! {
            ready = ensure_daemon(&client, launcher, policy) => ready.map(|_| ()),
            sig = signals.next() => {
                tracing::debug!(signal = ?sig, "interrupted while waiting for daemon");
                Err(BridgeError::Interrupted { signal: sig as i32 })
            }
        };
        if let Err(err) = ready {
            bridge.close().await;
            return Err(err);
        }

        let request = RegisterRequest::new(name, socket_path, port);
        let registration = match Registration::register(client, &request).await {
            Ok(registration) => registration,
            Err(err) => {
                bridge.close().await;
                return Err(err);
            }
        };

        Ok(Self {
            port,
            bridge,
            registration,
            signals,
        })
    }

    pub fn url(&self) -> &str {
        self.registration.url()
    }

    /// Port the wrapped process must listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_path(&self) -> &Path {
        self.bridge.path()
    }

    /// Run `command` to completion, then tear the session down.
    ///
    /// `dns_shim` is injected through the platform preload variable when it
    /// names an existing file.
    pub async fn run(
        mut self,
        command: &[String],
        dns_shim: Option<&Path>,
    ) -> Result<ExitOutcome, BridgeError> {
        let child = match self.spawn_child(command, dns_shim) {
            Ok(child) => child,
            Err(err) => {
                self.shutdown().await;
                return Err(err);
            }
        };

        let outcome = self.signals.wait(child).await;
        self.shutdown().await;
        outcome
    }

    /// Deregister, then close the bridge.
    pub async fn shutdown(mut self) {
        self.registration.deregister().await;
        self.bridge.close().await;
    }

    fn spawn_child(&self, command: &[String], dns_shim: Option<&Path>) -> Result<Child, BridgeError> {
        let Some((program, args)) = command.split_first() else {
            return Err(BridgeError::Command {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args).env("PORT", self.port.to_string());
        if let Some((var, value)) =
            dns_shim.and_then(|lib| preload_env(lib, std::env::var_os(PRELOAD_VAR)))
        {
            cmd.env(var, value);
        }

        let child = cmd.spawn().map_err(|source| BridgeError::Command {
            command: command.join(" "),
            source,
        })?;
        tracing::debug!(pid = child.id(), port = self.port, program = %program, "wrapped process started");
        Ok(child)
    }
}

/// Append `lib` to the preload variable, if it exists on disk.
fn preload_env(lib: &Path, existing: Option<OsString>) -> Option<(&'static str, OsString)> {
    if !lib.is_file() {
        tracing::debug!(lib = %lib.display(), "DNS shim not found, skipping");
        return None;
    }
    let value = match existing.filter(|v| !v.is_empty()) {
        Some(mut current) => {
            current.push(":");
            current.push(lib.as_os_str());
            current
        }
        None => lib.as_os_str().to_os_string(),
    };
    Some((PRELOAD_VAR, value))
}

/// Resolve the shim path from `LOHOST_DNS_LIB`.
pub fn dns_shim_from_env() -> Option<PathBuf> {
    std::env::var_os(ENV_DNS_LIB)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `SIGINT`/`SIGTERM` streams, relayed to the wrapped process.
#[derive(Debug)]
struct ForwardedSignals {
    interrupt: SignalStream,
    terminate: SignalStream,
}

impl ForwardedSignals {
    fn install() -> Result<Self, BridgeError> {
        Ok(Self {
            interrupt: unix_signal(SignalKind::interrupt())
                .map_err(|e| io_err("install SIGINT handler", e))?,
            terminate: unix_signal(SignalKind::terminate())
                .map_err(|e| io_err("install SIGTERM handler", e))?,
        })
    }

    /// Next `SIGINT` or `SIGTERM` delivered to this process.
    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::SIGINT,
            _ = self.terminate.recv() => Signal::SIGTERM,
        }
    }

    async fn wait(&mut self, mut child: Child) -> Result<ExitOutcome, BridgeError> {
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| io_err("wait for wrapped process", e))?;
                    return Ok(ExitOutcome::from(status));
                }
                sig = self.next() => forward(&child, sig),
            }
        }
    }
}

fn forward(child: &Child, sig: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = signal::kill(Pid::from_raw(pid), sig) {
        tracing::debug!(pid, signal = ?sig, error = %err, "signal forward failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exit_status_maps_code_and_signal() {
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(3 << 8)), ExitOutcome::Code(3));
        assert_eq!(ExitOutcome::from(ExitStatus::from_raw(15)), ExitOutcome::Signal(15));
    }

    #[test]
    fn preload_skips_missing_library() {
        assert!(preload_env(Path::new("/nonexistent/libshim.so"), None).is_none());
    }

    #[test]
    fn preload_appends_to_existing_value() {
        let dir = TempDir::new().expect("tempdir");
        let lib = dir.path().join("libshim.so");
        std::fs::write(&lib, b"").expect("lib");

        let (var, value) = preload_env(&lib, Some(OsString::from("/opt/other.so"))).expect("set");
        assert_eq!(var, PRELOAD_VAR);
        assert_eq!(value, OsString::from(format!("/opt/other.so:{}", lib.display())));

        let (_, value) = preload_env(&lib, None).expect("set");
        assert_eq!(value, lib.as_os_str());
    }
}
