//! `backupd list|add|remove|set_interval`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use backupd_core::BackupItem;

#[derive(Args, Debug)]
pub struct ItemArgs {
    /// File or directory; relative paths are resolved against the current directory.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct SetIntervalArgs {
    /// Seconds between backup cycles (must be positive).
    pub seconds: u64,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "item")]
    path: String,
    #[tabled(rename = "kind")]
    kind: String,
}

pub fn list() -> Result<()> {
    let home = super::home()?;
    let config = super::store(&home)
        .load_or_default()
        .context("failed to load configuration")?;

    println!(
        "destination: {}  interval: {}s",
        config.backup_destination.display(),
        config.interval
    );
    if config.items_to_backup.is_empty() {
        println!("No backup items configured.");
        println!("Run: backupd add <path>");
        return Ok(());
    }

    let rows: Vec<ItemRow> = config
        .items_to_backup
        .iter()
        .map(|path| ItemRow {
            path: path.display().to_string(),
            kind: match BackupItem::probe(path) {
                Ok(item) => item.kind.to_string(),
                Err(_) => "missing".red().to_string(),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

impl ItemArgs {
    pub fn add(&self) -> Result<()> {
        let home = super::home()?;
        let path = super::absolutize(&self.path)?;
        super::store(&home)
            .add_item(&path)
            .with_context(|| format!("failed to add {}", path.display()))?;
        println!("✓ Added {}", path.display());
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        let home = super::home()?;
        let path = super::absolutize(&self.path)?;
        super::store(&home)
            .remove_item(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        println!("✓ Removed {}", path.display());
        Ok(())
    }
}

impl SetIntervalArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        super::store(&home)
            .set_interval(self.seconds)
            .context("failed to set interval")?;
        println!("✓ Backup interval set to {}s", self.seconds);
        Ok(())
    }
}
