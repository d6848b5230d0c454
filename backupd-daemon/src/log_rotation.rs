//! Size-based rotation for `logs/backupd.log`.
//!
//! Runs once at daemon startup, before the log file is opened:
//!   backupd.log → backupd.log.1 → … → backupd.log.5

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use backupd_core::paths;

/// Rotate once the live log reaches 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// What [`rotate_if_needed`] did to the live log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// No log yet, or still under the size limit.
    Kept,
    /// The live log became `.1` and an empty log took its place.
    Rotated,
}

/// Shift `backupd.log.<n>` up one generation and start a fresh, empty
/// `backupd.log` once the live log has reached `max_bytes`.
///
/// Generation `max_files` is overwritten by the rename from `max_files - 1`,
/// so at most `max_files` rotated copies survive.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<Rotation> {
    match fs::metadata(log_path) {
        Ok(meta) if meta.len() >= max_bytes => {}
        Ok(_) => return Ok(Rotation::Kept),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Rotation::Kept),
        Err(err) => return Err(err),
    }

    for generation in (1..max_files).rev() {
        match fs::rename(
            numbered_path(log_path, generation),
            numbered_path(log_path, generation + 1),
        ) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    File::create(log_path)?;
    Ok(Rotation::Rotated)
}

/// Rotate the daemon log under `home`. Failures go to stderr since the log
/// itself is not open yet; the daemon starts regardless.
pub fn rotate_logs(home: &Path) -> Rotation {
    let log = paths::log_path(home);
    rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap_or_else(|err| {
        eprintln!("backupd: log rotation failed for {}: {err}", log.display());
        Rotation::Kept
    })
}

/// `backupd.log` → `backupd.log.<n>`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut raw = base.as_os_str().to_os_string();
    raw.push(format!(".{n}"));
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: u64 = 64;

    #[test]
    fn small_log_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("backupd.log");
        fs::write(&log, "short").unwrap();

        assert_eq!(rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap(), Rotation::Kept);
        assert!(log.exists());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("backupd.log");
        assert_eq!(rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap(), Rotation::Kept);
        assert!(!log.exists());
    }

    #[test]
    fn oversized_log_moves_to_first_slot_and_restarts_empty() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("backupd.log");
        fs::write(&log, vec![b'x'; SMALL as usize]).unwrap();

        assert_eq!(rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap(), Rotation::Rotated);
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), SMALL);
    }

    #[test]
    fn rotated_copies_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("backupd.log");
        for round in 0..(MAX_ROTATED_FILES + 2) {
            fs::write(&log, format!("{round:>80}")).unwrap();
            rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap();
        }

        for n in 1..=MAX_ROTATED_FILES {
            assert!(numbered_path(&log, n).exists(), ".{n} should exist");
        }
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
        let newest = fs::read_to_string(numbered_path(&log, 1)).unwrap();
        assert_eq!(newest.trim(), (MAX_ROTATED_FILES + 1).to_string());
    }

    #[test]
    fn rotate_logs_uses_state_layout() {
        let home = TempDir::new().unwrap();
        let log = paths::log_path(home.path());
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, vec![b'y'; MAX_LOG_BYTES as usize]).unwrap();

        assert_eq!(rotate_logs(home.path()), Rotation::Rotated);
        assert!(numbered_path(&log, 1).exists());
    }
}
