//! File-backed configuration store.
//!
//! # Protocol
//!
//! Every read and every write takes the exclusive lock on
//! `config.json.lock` first, so a daemon `load` never interleaves with a CLI
//! `mutate`. Writes go to `config.json.tmp`, get `chmod 0600`, then `rename`
//! over the target: a crash mid-write leaves the previous file intact.
//!
//! [`ConfigStore::mutate`] re-reads the file under the lock, applies the
//! caller's edit to that fresh copy, validates, and only then writes. A
//! failed validation leaves the file untouched.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{io_err, ConfigError};
use crate::lock::FileLock;
use crate::paths;
use crate::safety;
use crate::types::Configuration;

/// How long a store operation waits for the config lock by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConfigStore {
    home: PathBuf,
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl ConfigStore {
    /// Store at `<home>/.backupd/config.json`.
    pub fn at(home: &Path) -> Self {
        Self::with_path(home, paths::config_path(home))
    }

    /// Store backed by an explicit file; `home` still drives defaults and the
    /// protected-path checks.
    pub fn with_path(home: &Path, path: PathBuf) -> Self {
        Self {
            home: home.to_path_buf(),
            lock_path: paths::lock_path_for(&path),
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Load and validate the persisted configuration.
    ///
    /// `ConfigError::Missing` if absent, `ConfigError::Corrupt` if unparsable,
    /// `ConfigError::Invalid` if it parses but violates an invariant.
    pub fn load(&self) -> Result<Configuration, ConfigError> {
        let _lock = self.lock()?;
        let config = self.read_unlocked()?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but writes and returns the defaults on first
    /// run.
    pub fn load_or_default(&self) -> Result<Configuration, ConfigError> {
        let _lock = self.lock()?;
        match self.read_unlocked() {
            Ok(config) => {
                self.validate(&config)?;
                Ok(config)
            }
            Err(ConfigError::Missing { .. }) => {
                let config = Configuration::default_at(&self.home);
                self.write_unlocked(&config)?;
                Ok(config)
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Write
    // -----------------------------------------------------------------------

    /// Validate and atomically persist `config`.
    pub fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        self.validate(config)?;
        let _lock = self.lock()?;
        self.write_unlocked(config)
    }

    /// Locked read-modify-write.
    ///
    /// `edit` receives the freshly read configuration (defaults if the file
    /// is missing). If `edit` or validation fails, nothing is written.
    pub fn mutate<F, E>(&self, edit: F) -> Result<Configuration, E>
    where
        F: FnOnce(&mut Configuration) -> Result<(), E>,
        E: From<ConfigError>,
    {
        let _lock = self.lock()?;
        let mut config = match self.read_unlocked() {
            Ok(config) => config,
            Err(ConfigError::Missing { .. }) => Configuration::default_at(&self.home),
            Err(err) => return Err(err.into()),
        };
        edit(&mut config)?;
        self.validate(&config)?;
        self.write_unlocked(&config)?;
        Ok(config)
    }

    // -----------------------------------------------------------------------
    // CLI mutations
    // -----------------------------------------------------------------------

    /// Append `item`; it must be absolute, exist now, and not be configured yet.
    pub fn add_item(&self, item: &Path) -> Result<Configuration, ConfigError> {
        if !item.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "backup item {} is not an absolute path",
                item.display()
            )));
        }
        if fs::metadata(item).is_err() {
            return Err(ConfigError::Invalid(format!(
                "backup item {} does not exist",
                item.display()
            )));
        }
        self.mutate(|config| {
            if config.contains_item(item) {
                return Err(ConfigError::Invalid(format!(
                    "{} is already in the backup list",
                    item.display()
                )));
            }
            config.items_to_backup.push(item.to_path_buf());
            Ok(())
        })
    }

    /// Remove `item`; it must currently be configured.
    pub fn remove_item(&self, item: &Path) -> Result<Configuration, ConfigError> {
        self.mutate(|config| {
            let before = config.items_to_backup.len();
            config.items_to_backup.retain(|existing| existing != item);
            if config.items_to_backup.len() == before {
                return Err(ConfigError::Invalid(format!(
                    "{} is not in the backup list",
                    item.display()
                )));
            }
            Ok(())
        })
    }

    pub fn set_interval(&self, seconds: u64) -> Result<Configuration, ConfigError> {
        self.mutate(|config| {
            config.interval = seconds;
            Ok(())
        })
    }

    /// Point the configuration at a new destination without touching files.
    pub fn set_destination(&self, dest: &Path) -> Result<Configuration, ConfigError> {
        self.mutate(|config| {
            config.backup_destination = dest.to_path_buf();
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check every invariant of `config` without touching disk state.
    pub fn validate(&self, config: &Configuration) -> Result<(), ConfigError> {
        if config.interval == 0 {
            return Err(ConfigError::Invalid(
                "interval must be a positive number of seconds".to_string(),
            ));
        }

        for (index, item) in config.items_to_backup.iter().enumerate() {
            if !item.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "backup item {} is not an absolute path",
                    item.display()
                )));
            }
            if config.items_to_backup[..index].contains(item) {
                return Err(ConfigError::Invalid(format!(
                    "backup item {} is listed twice",
                    item.display()
                )));
            }
        }

        safety::check_destination(
            &config.backup_destination,
            &self.protected_homes(),
            &config.items_to_backup,
        )
        .map_err(|reason| {
            ConfigError::Invalid(format!(
                "backup destination {} is unsafe: {reason}",
                config.backup_destination.display()
            ))
        })?;
        Ok(())
    }

    /// Destinations that passed validation and may therefore be cleared.
    pub fn allowed_destinations(&self) -> Result<Vec<PathBuf>, ConfigError> {
        Ok(vec![self.load()?.backup_destination])
    }

    pub fn protected_homes(&self) -> Vec<PathBuf> {
        safety::protected_homes(&self.home)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> Result<FileLock, ConfigError> {
        Ok(FileLock::acquire(&self.lock_path, self.lock_timeout)?)
    }

    fn read_unlocked(&self) -> Result<Configuration, ConfigError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::Missing {
                    path: self.path.clone(),
                })
            }
            Err(err) => return Err(io_err(&self.path, err)),
        };
        serde_json::from_str(&contents).map_err(|source| ConfigError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_unlocked(&self, config: &Configuration) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = paths::tmp_path_for(&self.path);
        let mut json = serde_json::to_string_pretty(config)?;
        json.push('\n');
        fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&self.path, err));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
