//! [`ProcessController`]: start, stop, restart and status of the single
//! background daemon.
//!
//! `start` re-executes the `backupd` binary as `backupd run` in its own
//! process group and waits for the child to print [`READY_LINE`] on its
//! stdout pipe. The child only does that after its marker is written and its
//! signal handlers are installed.

use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;

use backupd_core::{paths, FileLock};

use crate::error::{io_err, DaemonError};
use crate::marker::{self, LivenessMarker};

/// Set in the environment of the spawned daemon process.
pub const DAEMON_CHILD_ENV: &str = "BACKUPD_DAEMON_CHILD";

/// Line the daemon child writes once it is running.
pub const READY_LINE: &str = "READY";

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StopOutcome {
    /// The daemon exited on SIGTERM.
    Graceful { pid: u32 },
    /// The daemon outlived the stop timeout and was killed.
    Forced { pid: u32 },
}

#[derive(Debug, Clone)]
pub struct ProcessController {
    home: PathBuf,
    exe: PathBuf,
    stop_timeout: Duration,
    ready_timeout: Duration,
}

impl ProcessController {
    /// `exe` is the `backupd` binary to launch for `start`.
    pub fn new(home: &Path, exe: impl Into<PathBuf>) -> Self {
        Self {
            home: home.to_path_buf(),
            exe: exe.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        Ok(match marker::live_at(&self.home)? {
            Some(marker) => DaemonStatus {
                running: true,
                pid: Some(marker.pid),
                started_at: Some(marker.started_at),
            },
            None => DaemonStatus {
                running: false,
                pid: None,
                started_at: None,
            },
        })
    }

    /// Launch the daemon and return its marker once it reports ready.
    pub fn start(&self) -> Result<LivenessMarker, DaemonError> {
        // Serializes concurrent `start` invocations.
        let _start_lock = FileLock::acquire(
            &paths::start_lock_path(&self.home),
            self.ready_timeout + Duration::from_secs(5),
        )?;

        if let Some(existing) = marker::live_at(&self.home)? {
            return Err(DaemonError::AlreadyRunning { pid: existing.pid });
        }

        let mut child = Command::new(&self.exe)
            .arg("run")
            .env(paths::HOME_ENV, &self.home)
            .env(DAEMON_CHILD_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| io_err(&self.exe, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DaemonError::StartupFailed("child stdout was not captured".into()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let result = BufReader::new(stdout).read_line(&mut line).map(|n| (n, line));
            let _ = tx.send(result);
        });

        let failure = match rx.recv_timeout(self.ready_timeout) {
            Ok(Ok((0, _))) => {
                let status = child
                    .wait()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(DaemonError::StartupFailed(format!(
                    "daemon exited before becoming ready ({status}); see {}",
                    paths::log_path(&self.home).display()
                )));
            }
            Ok(Ok((_, line))) if line.trim() == READY_LINE => None,
            Ok(Ok((_, line))) => Some(format!("unexpected daemon output: {}", line.trim())),
            Ok(Err(err)) => Some(format!("failed reading from daemon: {err}")),
            Err(_) => Some(format!(
                "daemon did not become ready within {}s",
                self.ready_timeout.as_secs()
            )),
        };
        if let Some(message) = failure {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DaemonError::StartupFailed(message));
        }

        let pid = child.id();
        // Reap the child if it exits while this process is still around.
        thread::spawn(move || {
            let _ = child.wait();
        });

        let marker = marker::read_at(&self.home)?
            .filter(|marker| marker.pid == pid)
            .ok_or_else(|| {
                DaemonError::StartupFailed(format!("daemon {pid} reported ready without a marker"))
            })?;
        tracing::info!(pid, "daemon started");
        Ok(marker)
    }

    /// Ask the daemon to exit, escalating to SIGKILL after the stop timeout.
    ///
    /// The pid comes from the marker; a pid recycled by an unrelated process
    /// between the liveness check and the signal would be signalled instead.
    pub fn stop(&self) -> Result<StopOutcome, DaemonError> {
        let marker = marker::live_at(&self.home)?.ok_or(DaemonError::NotRunning)?;
        let pid = marker.pid;
        let Ok(raw) = i32::try_from(pid) else {
            marker::remove_if_owned(&self.home, pid)?;
            return Err(DaemonError::NotRunning);
        };
        let target = Pid::from_raw(raw);

        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                marker::remove_if_owned(&self.home, pid)?;
                return Ok(StopOutcome::Graceful { pid });
            }
            Err(source) => return Err(DaemonError::Signal { pid, source }),
        }

        let deadline = Instant::now() + self.stop_timeout;
        while Instant::now() < deadline {
            if !marker::process_alive(pid) {
                marker::remove_if_owned(&self.home, pid)?;
                tracing::info!(pid, "daemon stopped");
                return Ok(StopOutcome::Graceful { pid });
            }
            thread::sleep(POLL_INTERVAL);
        }

        tracing::warn!(
            pid,
            timeout_secs = self.stop_timeout.as_secs_f64(),
            "ForcedStop: daemon did not exit after SIGTERM, sending SIGKILL"
        );
        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => return Err(DaemonError::Signal { pid, source }),
        }
        marker::remove_if_owned(&self.home, pid)?;
        Ok(StopOutcome::Forced { pid })
    }

    /// `stop` (a daemon that is not running is fine) followed by `start`.
    pub fn restart(&self) -> Result<(Option<StopOutcome>, LivenessMarker), DaemonError> {
        let stopped = match self.stop() {
            Ok(outcome) => Some(outcome),
            Err(DaemonError::NotRunning) => None,
            Err(err) => return Err(err),
        };
        let marker = self.start()?;
        Ok((stopped, marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Child;
    use tempfile::TempDir;

    /// Spawn `script` under `sh` and reap it in the background so its pid
    /// disappears as soon as it exits.
    fn spawn_reaped(script: &str) -> u32 {
        let mut child: Child = Command::new("sh").arg("-c").arg(script).spawn().unwrap();
        let pid = child.id();
        thread::spawn(move || {
            let _ = child.wait();
        });
        pid
    }

    fn write_marker(home: &Path, pid: u32) {
        LivenessMarker {
            pid,
            started_at: Utc::now(),
        }
        .write_at(home)
        .unwrap();
    }

    #[test]
    fn status_without_marker_is_not_running() {
        let home = TempDir::new().unwrap();
        let controller = ProcessController::new(home.path(), "/nonexistent/backupd");
        let status = controller.status().unwrap();
        assert!(!status.running);
        assert_eq!(status.pid, None);
    }

    #[test]
    fn status_reports_live_marker() {
        let home = TempDir::new().unwrap();
        write_marker(home.path(), std::process::id());
        let status = ProcessController::new(home.path(), "backupd").status().unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(std::process::id()));
    }

    #[test]
    fn stop_without_daemon_is_not_running() {
        let home = TempDir::new().unwrap();
        let err = ProcessController::new(home.path(), "backupd").stop().unwrap_err();
        assert!(matches!(err, DaemonError::NotRunning));
        assert_eq!(err.exit_code(), 21);
    }

    #[test]
    fn start_refuses_when_marker_is_live() {
        let home = TempDir::new().unwrap();
        write_marker(home.path(), std::process::id());
        let err = ProcessController::new(home.path(), "/nonexistent/backupd")
            .start()
            .unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
    }

    #[test]
    fn start_reports_child_that_exits_early() {
        let home = TempDir::new().unwrap();
        let err = ProcessController::new(home.path(), "false")
            .start()
            .unwrap_err();
        assert!(matches!(err, DaemonError::StartupFailed(_)), "got {err:?}");
    }

    #[test]
    fn start_gives_up_on_silent_child() {
        use std::os::unix::fs::PermissionsExt;

        let home = TempDir::new().unwrap();
        let exe = home.path().join("silent-daemon");
        std::fs::write(&exe, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let err = ProcessController::new(home.path(), &exe)
            .with_ready_timeout(Duration::from_millis(300))
            .start()
            .unwrap_err();

        match err {
            DaemonError::StartupFailed(message) => {
                assert!(message.contains("did not become ready"), "got {message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stop_ignores_marker_with_out_of_range_pid() {
        let home = TempDir::new().unwrap();
        write_marker(home.path(), u32::MAX);
        let err = ProcessController::new(home.path(), "backupd").stop().unwrap_err();
        assert!(matches!(err, DaemonError::NotRunning));
    }

    #[test]
    fn stop_terminates_cooperative_process() {
        let home = TempDir::new().unwrap();
        let pid = spawn_reaped("sleep 30");
        write_marker(home.path(), pid);

        let outcome = ProcessController::new(home.path(), "backupd")
            .with_stop_timeout(Duration::from_secs(5))
            .stop()
            .unwrap();

        assert_eq!(outcome, StopOutcome::Graceful { pid });
        assert!(!paths::marker_path(home.path()).exists());
    }

    #[test]
    fn stop_escalates_when_sigterm_is_ignored() {
        let home = TempDir::new().unwrap();
        let pid = spawn_reaped("trap '' TERM; while true; do sleep 1; done");
        thread::sleep(Duration::from_millis(200));
        write_marker(home.path(), pid);

        let outcome = ProcessController::new(home.path(), "backupd")
            .with_stop_timeout(Duration::from_millis(500))
            .stop()
            .unwrap();

        assert_eq!(outcome, StopOutcome::Forced { pid });
        assert!(!paths::marker_path(home.path()).exists());
    }
}
