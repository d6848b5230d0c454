use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and process control.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] backupd_core::ConfigError),

    #[error(transparent)]
    Sync(#[from] backupd_sync::SyncError),

    #[error(transparent)]
    Lock(#[from] backupd_core::LockError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backupd is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("backupd is not running")]
    NotRunning,

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("daemon failed to start: {0}")]
    StartupFailed(String),

    #[error("could not acquire the configuration lock after {attempts} attempts")]
    ConfigLockLost { attempts: u32 },

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

impl DaemonError {
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::AlreadyRunning { .. } => 20,
            DaemonError::NotRunning => 21,
            DaemonError::Config(err) => err.exit_code(),
            DaemonError::Sync(err) => err.exit_code(),
            DaemonError::Lock(err) => err.exit_code(),
            DaemonError::ConfigLockLost { .. } => 40,
            _ => 1,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
