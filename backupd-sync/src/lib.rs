//! # backupd-sync
//!
//! The synchronization engine: full-copy backup cycles, guarded destination
//! clearing, additive restore and destination migration.
//!
//! Every operation that reads or writes the destination tree holds
//! `run/sync.lock` for its whole duration, so a CLI clear or restore never
//! races a daemon cycle.

mod copy;
pub mod engine;
pub mod error;
pub mod report;

pub use copy::MAX_DEPTH;
pub use engine::{SyncEngine, DEFAULT_SYNC_LOCK_TIMEOUT};
pub use error::SyncError;
pub use report::{
    BackupReport, ClearReport, CopyStats, CycleOutcome, ItemWarning, MigrationReport,
    RestoreReport, WarningKind,
};
