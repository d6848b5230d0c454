//! Outcome records for engine operations.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Non-fatal per-item problem encountered during a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    SourceMissing,
    SourceUnreadable,
    CopyCycle,
    CopyFailed,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::SourceMissing => "SourceMissing",
            WarningKind::SourceUnreadable => "SourceUnreadable",
            WarningKind::CopyCycle => "CopyCycle",
            WarningKind::CopyFailed => "CopyFailed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemWarning {
    pub path: PathBuf,
    pub kind: WarningKind,
    pub detail: String,
}

impl ItemWarning {
    pub fn new(path: impl Into<PathBuf>, kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            detail: detail.into(),
        }
    }

    /// Classify a failure to stat or open a source path.
    pub fn from_source_error(path: &Path, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => WarningKind::SourceMissing,
            _ => WarningKind::SourceUnreadable,
        };
        Self::new(path, kind, err.to_string())
    }
}

impl fmt::Display for ItemWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.path.display(), self.detail)
    }
}

/// Counts of what a tree copy produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub dirs: usize,
}

impl CopyStats {
    pub fn absorb(&mut self, other: CopyStats) {
        self.files += other.files;
        self.dirs += other.dirs;
    }
}

/// How a backup cycle ended, as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    Partial,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Success => f.write_str("success"),
            CycleOutcome::Partial => f.write_str("partial"),
        }
    }
}

/// Result of one backup cycle.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub destination: PathBuf,
    pub items_copied: usize,
    pub stats: CopyStats,
    /// Items skipped because an enclosing configured directory carries them.
    pub nested: Vec<PathBuf>,
    pub warnings: Vec<ItemWarning>,
    pub duration: Duration,
}

impl BackupReport {
    pub fn outcome(&self) -> CycleOutcome {
        if self.warnings.is_empty() {
            CycleOutcome::Success
        } else {
            CycleOutcome::Partial
        }
    }

    pub(crate) fn warn(&mut self, warning: ItemWarning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub destination: PathBuf,
    pub removed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub target: PathBuf,
    pub entries: usize,
    pub stats: CopyStats,
    pub warnings: Vec<ItemWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: PathBuf,
    pub to: PathBuf,
    pub moved: usize,
    pub old_removed: bool,
}
