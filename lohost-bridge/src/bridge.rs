//! Unix socket ↔ loopback TCP relay for one wrapped process.
//!
//! The daemon only ever talks to services over Unix sockets; the wrapped
//! process only ever listens on `127.0.0.1:$PORT`. The bridge sits between
//! the two and splices every accepted connection.

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{TcpStream, UnixListener};
use tokio::task::JoinHandle;

use lohost_core::TunnelSet;

use crate::error::{io_err, BridgeError};

/// Reserve a free loopback port for the wrapped process.
///
/// The temporary listener is closed before returning, so another process could
/// in principle grab the port first; the wrapped process will then fail to
/// bind and report it.
pub fn allocate_port() -> Result<u16, BridgeError> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| io_err("allocate loopback port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| io_err("allocate loopback port", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// A bound, not yet serving, bridge listener.
#[derive(Debug)]
pub struct SocketBridge {
    path: PathBuf,
    target_port: u16,
    listener: UnixListener,
}

impl SocketBridge {
    /// Listen on `path`, replacing any stale socket file left behind by a
    /// previous run. Must be called inside a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>, target_port: u16) -> Result<Self, BridgeError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| io_err(format!("create {}", dir.display()), e))?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(format!("remove stale {}", path.display()), err)),
        }

        let listener = UnixListener::bind(&path).map_err(|source| BridgeError::Bind {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            target_port,
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    /// Start accepting in a background task.
    pub fn serve(self) -> BridgeHandle {
        let tunnels = TunnelSet::new();
        let accept = tokio::spawn(accept_loop(
            self.listener,
            self.target_port,
            tunnels.clone(),
        ));
        tracing::debug!(
            socket = %self.path.display(),
            port = self.target_port,
            "bridge listening",
        );
        BridgeHandle {
            path: self.path,
            target_port: self.target_port,
            accept,
            tunnels,
        }
    }
}

async fn accept_loop(listener: UnixListener, target_port: u16, tunnels: TunnelSet) {
    loop {
        let unix = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "bridge accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        match TcpStream::connect((Ipv4Addr::LOCALHOST, target_port)).await {
            Ok(tcp) => tunnels.splice(unix, tcp, format!("bridge:{target_port}")),
            Err(err) => {
                // Dropping the Unix side makes the daemon answer 502.
                tracing::debug!(port = target_port, error = %err, "wrapped process not accepting");
            }
        }
    }
}

/// A serving bridge. Dropping it without [`BridgeHandle::close`] leaves the
/// socket file on disk; the next bind for the same name removes it.
#[derive(Debug)]
pub struct BridgeHandle {
    path: PathBuf,
    target_port: u16,
    accept: JoinHandle<()>,
    tunnels: TunnelSet,
}

impl BridgeHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    /// Connection pairs currently spliced.
    pub fn live_connections(&self) -> usize {
        self.tunnels.len()
    }

    /// Force-close every live pair, stop listening, delete the socket file.
    pub async fn close(self) {
        let closed = self.tunnels.close_all();

        self.accept.abort();
        // Wait for the listener to actually drop before unlinking its path.
        let _ = self.accept.await;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(socket = %self.path.display(), error = %err, "failed to remove socket file");
            }
        }
        tracing::debug!(socket = %self.path.display(), closed, "bridge closed");
    }
}
