//! The liveness marker at `run/backupd.pid`.
//!
//! A marker whose process no longer exists is stale and is deleted the first
//! time anyone looks at it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use backupd_core::paths;

use crate::error::{io_err, DaemonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessMarker {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LivenessMarker {
    /// Marker describing the calling process.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    pub fn is_alive(&self) -> bool {
        process_alive(self.pid)
    }

    /// Atomically write the marker (tmp + rename).
    pub fn write_at(&self, home: &Path) -> Result<(), DaemonError> {
        let path = paths::marker_path(home);
        let dir = paths::run_dir(home);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let tmp = tmp_path(&path);
        let body = serde_json::to_vec(self)?;
        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(&body)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&path, err));
        }
        Ok(())
    }
}

/// Read the marker without checking liveness. A marker that cannot be parsed
/// is reported as absent.
pub fn read_at(home: &Path) -> Result<Option<LivenessMarker>, DaemonError> {
    let path = paths::marker_path(home);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    match serde_json::from_slice(&raw) {
        Ok(marker) => Ok(Some(marker)),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable liveness marker");
            Ok(None)
        }
    }
}

/// The marker, if it names a live process. Stale or unreadable markers are
/// removed as a side effect.
pub fn live_at(home: &Path) -> Result<Option<LivenessMarker>, DaemonError> {
    match read_at(home)? {
        Some(marker) if marker.is_alive() => Ok(Some(marker)),
        Some(marker) => {
            tracing::info!(pid = marker.pid, "removing stale liveness marker");
            remove_at(home)?;
            Ok(None)
        }
        None => {
            if paths::marker_path(home).exists() {
                remove_at(home)?;
            }
            Ok(None)
        }
    }
}

pub fn remove_at(home: &Path) -> Result<(), DaemonError> {
    let path = paths::marker_path(home);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Remove the marker only if it still names `pid`.
pub fn remove_if_owned(home: &Path, pid: u32) -> Result<bool, DaemonError> {
    match read_at(home)? {
        Some(marker) if marker.pid == pid => {
            remove_at(home)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// `kill(pid, 0)`: `EPERM` still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Removes the marker on drop if it still belongs to this process.
pub struct MarkerGuard {
    home: PathBuf,
    pid: u32,
}

impl MarkerGuard {
    pub fn new(home: &Path, pid: u32) -> Self {
        Self {
            home: home.to_path_buf(),
            pid,
        }
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if let Err(err) = remove_if_owned(&self.home, self.pid) {
            tracing::warn!(error = %err, "failed to remove liveness marker");
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".tmp");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn write_then_read_marker() {
        let home = TempDir::new().unwrap();
        let marker = LivenessMarker::current();
        marker.write_at(home.path()).unwrap();

        assert_eq!(read_at(home.path()).unwrap(), Some(marker.clone()));
        assert_eq!(live_at(home.path()).unwrap(), Some(marker));
        assert!(!tmp_path(&paths::marker_path(home.path())).exists());
    }

    #[test]
    fn stale_marker_is_removed_on_read() {
        let home = TempDir::new().unwrap();
        let marker = LivenessMarker {
            pid: dead_pid(),
            started_at: Utc::now(),
        };
        marker.write_at(home.path()).unwrap();

        assert_eq!(live_at(home.path()).unwrap(), None);
        assert!(!paths::marker_path(home.path()).exists());
    }

    #[test]
    fn garbage_marker_is_treated_as_absent() {
        let home = TempDir::new().unwrap();
        let path = paths::marker_path(home.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        assert_eq!(live_at(home.path()).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn guard_leaves_foreign_marker_alone() {
        let home = TempDir::new().unwrap();
        LivenessMarker::current().write_at(home.path()).unwrap();
        drop(MarkerGuard::new(home.path(), std::process::id() + 1));
        assert!(paths::marker_path(home.path()).exists());

        drop(MarkerGuard::new(home.path(), std::process::id()));
        assert!(!paths::marker_path(home.path()).exists());
    }
}
