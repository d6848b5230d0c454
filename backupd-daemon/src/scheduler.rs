//! The backup loop: `Idle → Running → Stopping → Terminated`.
//!
//! Each iteration waits out the configured interval, re-reads the
//! configuration and runs one backup cycle on the blocking pool. The wait can
//! be interrupted; a cycle in flight always runs to completion.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use backupd_core::{ConfigError, ConfigStore, Configuration, LockError};
use backupd_sync::{BackupReport, SyncEngine, SyncError};

use crate::error::DaemonError;

/// Config lock acquisitions per load before the daemon gives up.
pub const CONFIG_LOCK_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Terminated,
}

pub struct Scheduler {
    store: ConfigStore,
    engine: SyncEngine,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(store: ConfigStore, engine: SyncEngine) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            store,
            engine,
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Returns an error only when the configuration lock cannot be acquired
    /// after [`CONFIG_LOCK_ATTEMPTS`]; every other failure is logged and the
    /// loop carries on with the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DaemonError> {
        self.transition(SchedulerState::Running);
        let mut interval = match self.load_config().await {
            Ok(config) => config.interval_duration(),
            Err(err @ DaemonError::ConfigLockLost { .. }) => return Err(self.fail(err)),
            Err(err) => {
                tracing::error!(error = %err, "could not read configuration, using default interval");
                Duration::from_secs(backupd_core::types::DEFAULT_INTERVAL_SECS)
            }
        };

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tracing::debug!(interval_secs = interval.as_secs(), "waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let config = match self.load_config().await {
                Ok(config) => config,
                Err(err @ DaemonError::ConfigLockLost { .. }) => return Err(self.fail(err)),
                Err(err) => {
                    tracing::error!(error = %err, "cycle skipped: configuration unavailable");
                    continue;
                }
            };
            interval = config.interval_duration();
            self.run_cycle(config, &mut shutdown).await;
        }

        self.transition(SchedulerState::Stopping);
        self.transition(SchedulerState::Terminated);
        Ok(())
    }

    /// One backup cycle on the blocking pool. A stop request arriving
    /// mid-cycle moves the state to `Stopping` but the copy still finishes.
    pub async fn run_cycle(
        &self,
        config: Configuration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<BackupReport> {
        tracing::info!(
            items = config.items_to_backup.len(),
            destination = %config.backup_destination.display(),
            "backup cycle started"
        );
        let engine = self.engine.clone();
        let store = self.store.clone();
        let mut cycle =
            tokio::task::spawn_blocking(move || engine.backup_current(&store, &config));

        let joined = tokio::select! {
            joined = &mut cycle => joined,
            _ = stop_requested(shutdown) => {
                self.transition(SchedulerState::Stopping);
                tracing::info!("stop requested, finishing the current cycle");
                cycle.await
            }
        };

        match joined {
            Ok(Ok(report)) => {
                tracing::info!(
                    outcome = %report.outcome(),
                    items = report.items_copied,
                    files = report.stats.files,
                    warnings = report.warnings.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "backup cycle finished"
                );
                Some(report)
            }
            Ok(Err(err @ SyncError::DestinationChanged { .. })) => {
                tracing::info!(outcome = "skipped", reason = %err, "backup cycle skipped");
                None
            }
            Ok(Err(err @ SyncError::UnsafeDestination { .. })) => {
                tracing::error!(outcome = "failed", error = %err, "backup cycle aborted");
                None
            }
            Ok(Err(err)) => {
                tracing::error!(outcome = "failed", error = %err, "backup cycle failed");
                None
            }
            Err(err) => {
                tracing::error!(outcome = "failed", error = %err, "backup cycle panicked");
                None
            }
        }
    }

    async fn load_config(&self) -> Result<Configuration, DaemonError> {
        for attempt in 1..=CONFIG_LOCK_ATTEMPTS {
            let store = self.store.clone();
            let loaded = tokio::task::spawn_blocking(move || store.load())
                .await
                .map_err(|err| DaemonError::Join {
                    task: "config load",
                    message: err.to_string(),
                })?;
            match loaded {
                Err(ConfigError::Lock(LockError::Timeout { .. })) => {
                    tracing::warn!(attempt, "configuration lock busy");
                }
                other => return Ok(other?),
            }
        }
        Err(DaemonError::ConfigLockLost {
            attempts: CONFIG_LOCK_ATTEMPTS,
        })
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "scheduler state");
        }
    }

    fn fail(&self, err: DaemonError) -> DaemonError {
        tracing::error!(error = %err, "fatal: daemon exiting");
        self.transition(SchedulerState::Terminated);
        err
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
