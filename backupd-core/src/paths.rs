//! State directory layout.
//!
//! ```text
//! <home>/.backupd/
//!   config.json
//!   config.json.lock
//!   backup/            default destination
//!   run/backupd.pid    liveness marker
//!   run/sync.lock      destination lock
//!   run/start.lock     serializes concurrent `start` calls
//!   logs/backupd.log
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const STATE_DIR: &str = ".backupd";
pub const CONFIG_FILE: &str = "config.json";
pub const MARKER_FILE: &str = "backupd.pid";
pub const LOG_FILE: &str = "backupd.log";

/// Environment variable that overrides the home directory used for state.
pub const HOME_ENV: &str = "BACKUPD_HOME";

pub fn state_root(home: &Path) -> PathBuf {
    home.join(STATE_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    state_root(home).join(CONFIG_FILE)
}

pub fn default_destination(home: &Path) -> PathBuf {
    state_root(home).join("backup")
}

pub fn run_dir(home: &Path) -> PathBuf {
    state_root(home).join("run")
}

pub fn marker_path(home: &Path) -> PathBuf {
    run_dir(home).join(MARKER_FILE)
}

pub fn sync_lock_path(home: &Path) -> PathBuf {
    run_dir(home).join("sync.lock")
}

pub fn start_lock_path(home: &Path) -> PathBuf {
    run_dir(home).join("start.lock")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    state_root(home).join("logs")
}

pub fn log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(LOG_FILE)
}

/// Sibling lock file for a config path: `config.json` → `config.json.lock`.
///
/// The config itself is replaced by rename on every write, so the lock must
/// live on a file whose inode never changes.
pub fn lock_path_for(config: &Path) -> PathBuf {
    with_suffix(config, "lock")
}

pub(crate) fn tmp_path_for(config: &Path) -> PathBuf {
    with_suffix(config, "tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| CONFIG_FILE.to_string());
    path.with_file_name(format!("{name}.{suffix}"))
}

/// Resolve the home directory: `$BACKUPD_HOME` first, then `dirs::home_dir()`.
pub fn resolve_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
