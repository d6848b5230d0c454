//! Error types for backupd-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to take one of the advisory lock files.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("I/O error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LockError::Timeout { .. } => 40,
            LockError::Io { .. } => 1,
        }
    }
}

/// All errors that can arise from configuration store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file does not exist; callers substitute defaults.
    #[error("configuration not found at {path}")]
    Missing { path: PathBuf },

    /// The configuration file exists but is not a valid configuration record.
    #[error("configuration at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value violates a configuration invariant; nothing was persisted.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("configuration serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or $BACKUPD_HOME")]
    HomeNotFound,
}

impl ConfigError {
    /// Process exit status used by the CLI for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConfigError::Missing { .. } => 10,
            ConfigError::Corrupt { .. } => 11,
            ConfigError::Invalid(_) => 12,
            ConfigError::Lock(err) => err.exit_code(),
            ConfigError::Io { .. } | ConfigError::Json(_) | ConfigError::HomeNotFound => 1,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
