//! On-disk locations under `~/.lohost`.

use std::path::{Path, PathBuf};

pub const DAEMON_LOG: &str = "daemon.log";

pub fn lohost_root(home: &Path) -> PathBuf {
    home.join(".lohost")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    lohost_root(home).join("logs")
}

/// Stdout and stderr of a detached daemon are both appended here.
pub fn daemon_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}
