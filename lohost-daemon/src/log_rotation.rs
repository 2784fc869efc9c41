//! Size-based rotation of the detached daemon's log file.
//!
//! A detached daemon holds its log open for its whole life, so rotation runs
//! on the spawning side right before a new daemon is launched: the fresh
//! process always opens a fresh file.
//!
//! Scheme: `daemon.log` → `daemon.log.1` → … → `daemon.log.5` (oldest dropped).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the live log reaches 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated generations kept next to the live log.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it has reached `max_bytes`.
///
/// Returns `true` if a rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, keep: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || keep == 0 {
        return Ok(false);
    }

    // Walk generations from oldest to newest; the oldest is overwritten.
    for generation in (1..keep).rev() {
        let from = generation_path(log_path, generation);
        match fs::rename(&from, generation_path(log_path, generation + 1)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    fs::rename(log_path, generation_path(log_path, 1))?;
    Ok(true)
}

/// Rotate the daemon log under `home`; failures are logged, never fatal.
pub fn rotate_daemon_log(home: &Path) {
    let log_path = crate::paths::daemon_log_path(home);
    match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "daemon log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "daemon log rotation failed")
        }
    }
}

fn generation_path(base: &Path, generation: usize) -> PathBuf {
    let mut name = base.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{generation}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn small_log_is_left_alone() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("daemon.log");
        fs::write(&log, b"hello").expect("write");

        assert!(!rotate_if_needed(&log, 1024, 3).expect("rotate"));
        assert!(log.exists());
        assert!(!generation_path(&log, 1).exists());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("daemon.log");
        assert!(!rotate_if_needed(&log, 1, 3).expect("rotate"));
    }

    #[test]
    fn oversized_log_moves_to_first_generation() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("daemon.log");
        fs::write(&log, vec![b'x'; 64]).expect("write");

        assert!(rotate_if_needed(&log, 32, 3).expect("rotate"));
        assert!(!log.exists(), "next daemon creates a fresh log");
        assert_eq!(fs::metadata(generation_path(&log, 1)).expect("gen 1").len(), 64);
    }

    #[test]
    fn generations_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("daemon.log");

        for round in 1..=4u8 {
            fs::write(&log, vec![b'0' + round; 64]).expect("write");
            rotate_if_needed(&log, 32, 3).expect("rotate");
        }

        // Newest first: round 4 in .1, round 3 in .2, round 2 in .3; round 1 gone.
        for (generation, round) in [(1, 4u8), (2, 3), (3, 2)] {
            let content = fs::read(generation_path(&log, generation)).expect("generation");
            assert_eq!(content[0], b'0' + round, "generation {generation}");
        }
        assert!(!generation_path(&log, 4).exists());
    }

    #[test]
    fn generation_names_append_a_counter() {
        let path = generation_path(Path::new("/var/log/daemon.log"), 2);
        assert_eq!(path, PathBuf::from("/var/log/daemon.log.2"));
    }
}
