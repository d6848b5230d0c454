//! [`SyncEngine`]: backup, clear, restore and destination migration.
//!
//! The copy model is a full copy on every cycle. Sources are never modified;
//! the destination only ever grows except through an explicit clear or a
//! migration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use backupd_core::{paths, safety, BackupItem, ConfigStore, Configuration, FileLock};

use crate::copy;
use crate::error::{io_err, SyncError};
use crate::report::{
    BackupReport, ClearReport, ItemWarning, MigrationReport, RestoreReport, WarningKind,
};

/// How long an operation waits for another one to release the destination.
pub const DEFAULT_SYNC_LOCK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SyncEngine {
    home: PathBuf,
    lock_timeout: Duration,
}

impl SyncEngine {
    pub fn at(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            lock_timeout: DEFAULT_SYNC_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    /// Copy every configured item into the destination under its base name.
    ///
    /// Per-item failures become warnings on the report. Only an unsafe
    /// destination, a lock timeout or a destination that cannot be created
    /// abort the cycle.
    pub fn backup(&self, config: &Configuration) -> Result<BackupReport, SyncError> {
        self.run_backup(config, None)
    }

    /// [`backup`](Self::backup) for a configuration loaded earlier from
    /// `store`. Once the sync lock is held the store is re-read; if the
    /// destination moved in the meantime the cycle is skipped with
    /// [`SyncError::DestinationChanged`] and nothing is written.
    pub fn backup_current(
        &self,
        store: &ConfigStore,
        config: &Configuration,
    ) -> Result<BackupReport, SyncError> {
        self.run_backup(config, Some(store))
    }

    fn run_backup(
        &self,
        config: &Configuration,
        store: Option<&ConfigStore>,
    ) -> Result<BackupReport, SyncError> {
        let started = Instant::now();
        let dest = self.checked_destination(config)?;
        let _lock = self.lock()?;
        if let Some(store) = store {
            let current = safety::normalize(&store.load()?.backup_destination);
            if current != dest {
                return Err(SyncError::DestinationChanged {
                    configured: dest,
                    current,
                });
            }
        }
        fs::create_dir_all(&dest).map_err(|e| io_err(&dest, e))?;

        let mut report = BackupReport {
            destination: dest.clone(),
            ..BackupReport::default()
        };

        for path in &config.items_to_backup {
            if let Some(parent) = enclosing_item(path, &config.items_to_backup) {
                debug!(
                    "skipping {}: already covered by {}",
                    path.display(),
                    parent.display()
                );
                report.nested.push(path.clone());
                continue;
            }

            let item = match BackupItem::probe(path) {
                Ok(item) => item,
                Err(err) => {
                    report.warn(ItemWarning::from_source_error(path, &err));
                    continue;
                }
            };
            let Some(name) = item.base_name() else {
                report.warn(ItemWarning::new(
                    path,
                    WarningKind::SourceUnreadable,
                    "path has no base name",
                ));
                continue;
            };
            let target = dest.join(name);

            match copy::copy_item(&item, &target) {
                Ok(copied) => {
                    debug!("copied {} ({}) -> {}", path.display(), item.kind, target.display());
                    report.items_copied += 1;
                    report.stats.absorb(copied.stats);
                    for warning in copied.warnings {
                        report.warn(warning);
                    }
                }
                Err(err @ (SyncError::CopyCycle { .. } | SyncError::TooDeep { .. })) => {
                    report.warn(ItemWarning::new(path, WarningKind::CopyCycle, err.to_string()))
                }
                Err(SyncError::Source { path: at, source }) => {
                    report.warn(ItemWarning::from_source_error(&at, &source))
                }
                Err(SyncError::Io { path: at, source }) => report.warn(ItemWarning::new(
                    at,
                    WarningKind::CopyFailed,
                    source.to_string(),
                )),
                Err(other) => return Err(other),
            }
        }

        report.duration = started.elapsed();
        info!(
            "backup {} in {:.2}s: {} item(s), {} file(s), {} warning(s) -> {}",
            report.outcome(),
            report.duration.as_secs_f64(),
            report.items_copied,
            report.stats.files,
            report.warnings.len(),
            dest.display()
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Clear
    // -----------------------------------------------------------------------

    /// Delete the immediate contents of `dest`, keeping `dest` itself.
    ///
    /// `dest` must pass the safety policy and be one of `allowed`. Symlinks
    /// inside are removed as links, never followed.
    pub fn clear_destination(
        &self,
        dest: &Path,
        allowed: &[PathBuf],
    ) -> Result<ClearReport, SyncError> {
        let checked = safety::check_clearable(dest, allowed, &self.protected_homes()).map_err(
            |reason| SyncError::UnsafeDestination {
                path: dest.to_path_buf(),
                reason,
            },
        )?;
        let _lock = self.lock()?;

        let mut report = ClearReport {
            destination: checked.clone(),
            removed: 0,
        };
        let entries = match fs::read_dir(&checked) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("clear: {} does not exist, nothing to do", checked.display());
                return Ok(report);
            }
            Err(err) => return Err(io_err(&checked, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| io_err(&checked, e))?;
            remove_entry(&entry.path())?;
            report.removed += 1;
        }
        info!("cleared {} entries from {}", report.removed, checked.display());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Copy the destination's contents into `target`, overwriting same-named
    /// entries and leaving everything else in `target` alone.
    pub fn restore(&self, config: &Configuration, target: &Path) -> Result<RestoreReport, SyncError> {
        let source = safety::normalize(&config.backup_destination);
        let target = safety::normalize(target);
        if target.starts_with(&source) {
            return Err(SyncError::UnsafeDestination {
                path: target,
                reason: safety::UnsafeReason::OverlapsSource(source),
            });
        }

        let _lock = self.lock()?;
        let mut names = match fs::read_dir(&source) {
            Ok(entries) => entries
                .map(|entry| entry.map(|e| e.file_name()))
                .collect::<io::Result<Vec<_>>>()
                .map_err(|e| io_err(&source, e))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(io_err(&source, err)),
        };
        if names.is_empty() {
            return Err(SyncError::DestinationEmpty { path: source });
        }
        names.sort();

        fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
        let mut report = RestoreReport {
            target: target.clone(),
            ..RestoreReport::default()
        };

        for name in names {
            let from = source.join(&name);
            let item = match BackupItem::probe(&from) {
                Ok(item) => item,
                Err(err) => {
                    let warning = ItemWarning::from_source_error(&from, &err);
                    warn!("{warning}");
                    report.warnings.push(warning);
                    continue;
                }
            };
            let copied = match copy::copy_item(&item, &target.join(&name)) {
                Ok(copied) => copied,
                Err(SyncError::Source { path, source }) => {
                    let warning = ItemWarning::from_source_error(&path, &source);
                    warn!("{warning}");
                    report.warnings.push(warning);
                    continue;
                }
                Err(err) => return Err(err),
            };
            report.entries += 1;
            report.stats.absorb(copied.stats);
            for warning in copied.warnings {
                warn!("{warning}");
                report.warnings.push(warning);
            }
        }

        info!(
            "restored {} entries ({} files) from {} into {}",
            report.entries,
            report.stats.files,
            source.display(),
            target.display()
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Migration
    // -----------------------------------------------------------------------

    /// Move everything from the configured destination to `new_dest` and
    /// persist the new destination.
    ///
    /// The candidate is checked before any file moves. The sync lock is taken
    /// first and held until the new destination is persisted; a cycle that
    /// loaded the old configuration and goes through
    /// [`backup_current`](Self::backup_current) sees the change and skips.
    /// Lock order is sync lock, then config lock.
    pub fn change_destination(
        &self,
        store: &ConfigStore,
        new_dest: &Path,
    ) -> Result<(Configuration, MigrationReport), SyncError> {
        let _lock = self.lock()?;
        let mut migration = None;
        let config = store.mutate(|config| -> Result<(), SyncError> {
            let mut candidate = config.clone();
            candidate.backup_destination = new_dest.to_path_buf();
            let to = self.checked_destination(&candidate)?;
            store.validate(&candidate)?;

            let from = safety::normalize(&config.backup_destination);
            migration = Some(migrate(&from, &to)?);
            config.backup_destination = new_dest.to_path_buf();
            Ok(())
        })?;

        let report = migration.unwrap_or_default();
        info!(
            "destination changed {} -> {} ({} entries moved)",
            report.from.display(),
            report.to.display(),
            report.moved
        );
        Ok((config, report))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn checked_destination(&self, config: &Configuration) -> Result<PathBuf, SyncError> {
        safety::check_destination(
            &config.backup_destination,
            &self.protected_homes(),
            &config.items_to_backup,
        )
        .map_err(|reason| SyncError::UnsafeDestination {
            path: config.backup_destination.clone(),
            reason,
        })
    }

    fn protected_homes(&self) -> Vec<PathBuf> {
        safety::protected_homes(&self.home)
    }

    fn lock(&self) -> Result<FileLock, SyncError> {
        Ok(FileLock::acquire(
            &paths::sync_lock_path(&self.home),
            self.lock_timeout,
        )?)
    }
}

/// The configured directory item that strictly contains `path`, if any.
fn enclosing_item<'a>(path: &Path, items: &'a [PathBuf]) -> Option<&'a PathBuf> {
    let normalized = safety::normalize(path);
    items.iter().find(|other| {
        if other.as_path() == path {
            return false;
        }
        let other_normalized = safety::normalize(other);
        other_normalized != normalized
            && normalized.starts_with(&other_normalized)
            && other_normalized.is_dir()
    })
}

fn remove_entry(path: &Path) -> Result<(), SyncError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| io_err(path, e))
    } else {
        fs::remove_file(path).map_err(|e| io_err(path, e))
    }
}

/// Move the contents of `from` into `to`. Entries from `from` replace
/// same-named entries in `to`. `from` is removed afterwards if it ended up
/// empty.
fn migrate(from: &Path, to: &Path) -> Result<MigrationReport, SyncError> {
    let mut report = MigrationReport {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        ..MigrationReport::default()
    };
    if from == to {
        return Ok(report);
    }
    if to.starts_with(from) || from.starts_with(to) {
        return Err(SyncError::UnsafeDestination {
            path: to.to_path_buf(),
            reason: safety::UnsafeReason::OverlapsSource(from.to_path_buf()),
        });
    }

    fs::create_dir_all(to).map_err(|e| io_err(to, e))?;
    let entries = match fs::read_dir(from) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(io_err(from, err)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_err(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if fs::symlink_metadata(&dst).is_ok() {
            remove_entry(&dst)?;
        }
        if let Err(err) = fs::rename(&src, &dst) {
            // Different filesystems: fall back to copy then delete.
            debug!("rename {} failed ({err}), copying instead", src.display());
            let item = BackupItem::probe(&src).map_err(|e| io_err(&src, e))?;
            copy::copy_item(&item, &dst)?;
            remove_entry(&src)?;
        }
        report.moved += 1;
    }

    report.old_removed = fs::remove_dir(from).is_ok();
    Ok(report)
}
