use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Error surface for the daemon runtime and the control-API client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("port {port} is already in use (is another lohost daemon running?)")]
    PortInUse { port: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid HTTP request: {0}")]
    Request(#[from] http::Error),

    #[error("daemon is not running (nothing listening on {addr})")]
    DaemonNotRunning { addr: SocketAddr },

    #[error("daemon at {addr} did not answer within {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("daemon returned {status}: {message}")]
    Api { status: u16, message: String },
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        context: context.into(),
        source,
    }
}
