//! `backupd change_destination|clear_destination|paste`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use backupd_sync::ItemWarning;

#[derive(Args, Debug)]
pub struct ChangeDestinationArgs {
    /// New backup destination directory.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct PasteArgs {
    /// Directory to restore into; created if it does not exist.
    pub path: PathBuf,
}

impl ChangeDestinationArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        let target = super::absolutize(&self.path)?;
        let (_, report) = super::engine(&home)
            .change_destination(&super::store(&home), &target)
            .with_context(|| format!("failed to change destination to {}", target.display()))?;
        println!(
            "✓ Destination changed to {} ({} entries moved)",
            target.display(),
            report.moved
        );
        Ok(())
    }
}

pub fn clear() -> Result<()> {
    let home = super::home()?;
    let store = super::store(&home);
    let config = store.load_or_default().context("failed to load configuration")?;
    let allowed = store
        .allowed_destinations()
        .context("failed to load configuration")?;
    let report = super::engine(&home)
        .clear_destination(&config.backup_destination, &allowed)
        .context("failed to clear destination")?;
    println!(
        "✓ Cleared {} entries from {}",
        report.removed,
        report.destination.display()
    );
    Ok(())
}

impl PasteArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        let target = super::absolutize(&self.path)?;
        let config = super::store(&home)
            .load_or_default()
            .context("failed to load configuration")?;
        let report = super::engine(&home)
            .restore(&config, &target)
            .with_context(|| format!("failed to restore into {}", target.display()))?;
        print_warnings(&report.warnings);
        println!(
            "✓ Restored {} entries ({} files) into {}",
            report.entries,
            report.stats.files,
            report.target.display()
        );
        Ok(())
    }
}

fn print_warnings(warnings: &[ItemWarning]) {
    for warning in warnings {
        eprintln!("{} {warning}", "warning:".yellow().bold());
    }
}
