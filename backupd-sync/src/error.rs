//! Error types for backupd-sync.

use std::path::PathBuf;

use thiserror::Error;

use backupd_core::{ConfigError, LockError, UnsafeReason};

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured source could not be stat'ed, opened or listed.
    #[error("cannot read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination failed the safety policy; nothing was touched.
    #[error("unsafe destination {path}: {reason}")]
    UnsafeDestination { path: PathBuf, reason: UnsafeReason },

    #[error("nothing to restore: {path} is empty or missing")]
    DestinationEmpty { path: PathBuf },

    /// A followed symlink leads back to one of its own ancestors.
    #[error("symlink cycle detected at {path}")]
    CopyCycle { path: PathBuf },

    #[error("directory tree under {path} is deeper than {limit} levels")]
    TooDeep { path: PathBuf, limit: usize },

    /// The destination moved while this cycle waited for the sync lock.
    #[error("destination changed from {configured} to {current}; cycle skipped")]
    DestinationChanged { configured: PathBuf, current: PathBuf },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SyncError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::UnsafeDestination { .. } => 30,
            SyncError::DestinationEmpty { .. } => 31,
            SyncError::CopyCycle { .. } | SyncError::TooDeep { .. } => 32,
            SyncError::Config(err) => err.exit_code(),
            SyncError::Lock(err) => err.exit_code(),
            SyncError::Io { .. }
            | SyncError::Source { .. }
            | SyncError::DestinationChanged { .. } => 1,
        }
    }
}

/// Convenience constructor for [`SyncError::Source`].
pub(crate) fn source_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Source {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
