//! Domain types for the backup configuration.
//!
//! All path fields use `PathBuf`; the JSON form is exactly
//! `{"interval", "backup_destination", "items_to_backup"}`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths;

/// Seconds between backup cycles when nothing else is configured.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Persisted configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Seconds between backup cycles; always > 0 once validated.
    pub interval: u64,
    /// Absolute copy target.
    pub backup_destination: PathBuf,
    /// Absolute sources, duplicate-free, in backup order.
    pub items_to_backup: Vec<PathBuf>,
}

impl Configuration {
    /// First-run defaults: 300 s interval, `<home>/.backupd/backup`, no items.
    pub fn default_at(home: &Path) -> Self {
        Self {
            interval: DEFAULT_INTERVAL_SECS,
            backup_destination: paths::default_destination(home),
            items_to_backup: Vec::new(),
        }
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn contains_item(&self, path: &Path) -> bool {
        self.items_to_backup.iter().any(|item| item == path)
    }
}

/// Whether a source resolved to a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::File => f.write_str("file"),
            ItemKind::Directory => f.write_str("directory"),
        }
    }
}

/// A configured source resolved against the live filesystem.
///
/// Never persisted; probed fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupItem {
    pub path: PathBuf,
    pub kind: ItemKind,
}

impl BackupItem {
    /// Stat `path`, following symlinks. Anything that is neither a regular
    /// file nor a directory (sockets, fifos, devices) is reported as
    /// `InvalidInput`.
    pub fn probe(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let kind = if meta.is_dir() {
            ItemKind::Directory
        } else if meta.is_file() {
            ItemKind::File
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file or directory",
            ));
        };
        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Name the item takes inside the destination tree.
    pub fn base_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}
