//! tracing-subscriber setup for the daemon and the CLI.
//!
//! Both honour `RUST_LOG`. `log` records from the sync engine are bridged
//! through the subscriber's `tracing-log` integration.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use backupd_core::paths;

use crate::error::{io_err, DaemonError};

/// Append timestamped lines to `logs/backupd.log`, default level `info`.
pub fn init_file_tracing(home: &Path) -> Result<(), DaemonError> {
    let logs = paths::logs_dir(home);
    std::fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    let path = paths::log_path(home);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_err(&path, e))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

/// Short-lived CLI processes log to stderr, warnings and up.
pub fn init_cli_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
