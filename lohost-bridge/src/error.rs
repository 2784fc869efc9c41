use std::path::PathBuf;

use thiserror::Error;

use lohost_daemon::DaemonError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error at {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lohost daemon did not become ready after {attempts} health checks")]
    StartupTimeout { attempts: u32 },

    #[error("interrupted by signal {signal} during startup")]
    Interrupted { signal: i32 },

    #[error("failed to launch lohost daemon: {0}")]
    Launch(#[source] std::io::Error),

    #[error("failed to start `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> BridgeError {
    BridgeError::Io {
        context: context.into(),
        source,
    }
}
