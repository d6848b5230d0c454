pub mod daemon;
pub mod destination;
pub mod items;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use backupd_core::{paths, ConfigStore};
use backupd_sync::SyncEngine;

/// CLI operations wait this long for a running backup cycle to finish.
const CLI_SYNC_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) fn home() -> Result<PathBuf> {
    paths::resolve_home().context("could not determine home directory")
}

pub(crate) fn store(home: &Path) -> ConfigStore {
    ConfigStore::at(home)
}

pub(crate) fn engine(home: &Path) -> SyncEngine {
    SyncEngine::at(home).with_lock_timeout(CLI_SYNC_LOCK_TIMEOUT)
}

/// Resolve a user-supplied path against the current directory, dropping `.`
/// components.
pub(crate) fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("could not determine current directory")?
            .join(path)
    };
    Ok(joined.components().collect())
}
