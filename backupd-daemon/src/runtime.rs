use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use backupd_core::{paths, ConfigStore};
use backupd_sync::SyncEngine;

use crate::error::{io_err, DaemonError};
use crate::marker::{self, LivenessMarker, MarkerGuard};
use crate::scheduler::Scheduler;
use crate::{log_rotation, logging};

/// Per-attempt wait on the config lock inside the daemon. A migration holds
/// the lock while it moves data, so this is longer than the CLI default.
pub const DAEMON_CONFIG_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the daemon in the calling process until SIGTERM or SIGINT.
///
/// `on_ready` is called once the marker is written and signal handlers are
/// installed; the spawned child uses it to print the readiness line.
pub fn run_daemon<F>(home: &Path, on_ready: F) -> Result<(), DaemonError>
where
    F: FnOnce(&LivenessMarker) -> io::Result<()>,
{
    ensure_runtime_dirs(home)?;
    log_rotation::rotate_logs(home);
    logging::init_file_tracing(home)?;

    let result = run_inner(home, on_ready);
    if let Err(err) = &result {
        tracing::error!(error = %err, "backupd exited with an error");
    }
    result
}

fn run_inner<F>(home: &Path, on_ready: F) -> Result<(), DaemonError>
where
    F: FnOnce(&LivenessMarker) -> io::Result<()>,
{
    let store = ConfigStore::at(home).with_lock_timeout(DAEMON_CONFIG_LOCK_TIMEOUT);
    store.load_or_default()?;

    if let Some(existing) = marker::live_at(home)? {
        if existing.pid != std::process::id() {
            return Err(DaemonError::AlreadyRunning { pid: existing.pid });
        }
    }
    let marker = LivenessMarker::current();
    marker.write_at(home)?;
    let _guard = MarkerGuard::new(home, marker.pid);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?;

        on_ready(&marker).map_err(|e| io_err("readiness pipe", e))?;
        tracing::info!(pid = marker.pid, home = %home.display(), "backupd started");

        let signals = tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            let _ = stop_tx.send(true);
        });

        let scheduler = Scheduler::new(store, SyncEngine::at(home));
        let outcome = scheduler.run(stop_rx).await;
        signals.abort();
        outcome
    })?;

    tracing::info!(pid = marker.pid, "backupd stopped");
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [paths::run_dir(home), paths::logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}
