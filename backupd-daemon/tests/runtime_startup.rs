use std::fs;
use std::process::{Child, Command};

use backupd_core::paths;
use backupd_daemon::{marker, run_daemon, DaemonError, LivenessMarker};
use tempfile::TempDir;

struct Sleeper(Child);

impl Drop for Sleeper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn second_daemon_refuses_to_start() {
    let home = TempDir::new().expect("home");
    let other = Sleeper(Command::new("sleep").arg("30").spawn().expect("spawn sleep"));
    LivenessMarker {
        pid: other.0.id(),
        started_at: chrono::Utc::now(),
    }
    .write_at(home.path())
    .expect("write marker");

    let mut ready_called = false;
    let err = run_daemon(home.path(), |_| {
        ready_called = true;
        Ok(())
    })
    .unwrap_err();

    assert!(matches!(err, DaemonError::AlreadyRunning { pid } if pid == other.0.id()));
    assert_eq!(err.exit_code(), 20);
    assert!(!ready_called);
    let still = marker::read_at(home.path()).expect("read").expect("marker kept");
    assert_eq!(still.pid, other.0.id());
}

#[test]
fn invalid_config_fails_before_ready() {
    let home = TempDir::new().expect("home");
    let config = paths::config_path(home.path());
    fs::create_dir_all(config.parent().expect("parent")).expect("state dir");
    fs::write(
        &config,
        r#"{"interval": 0, "backup_destination": "/var/backups/x", "items_to_backup": []}"#,
    )
    .expect("write config");

    let err = run_daemon(home.path(), |_| panic!("must not report ready")).unwrap_err();

    assert_eq!(err.exit_code(), 12);
    assert!(!paths::marker_path(home.path()).exists());
    assert!(paths::log_path(home.path()).exists(), "log opened before failing");
}
