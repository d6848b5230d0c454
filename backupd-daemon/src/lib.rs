//! backupd daemon: liveness marker, process control, the backup scheduler
//! and the long-running runtime that hosts it.

mod error;
pub mod controller;
pub mod log_rotation;
pub mod logging;
pub mod marker;
mod runtime;
pub mod scheduler;

pub use controller::{DaemonStatus, ProcessController, StopOutcome, DAEMON_CHILD_ENV, READY_LINE};
pub use error::DaemonError;
pub use marker::LivenessMarker;
pub use runtime::{run_daemon, DAEMON_CONFIG_LOCK_TIMEOUT};
pub use scheduler::{Scheduler, SchedulerState, CONFIG_LOCK_ATTEMPTS};
