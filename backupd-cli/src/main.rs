//! backupd: periodic backup daemon and its control CLI.
//!
//! # Usage
//!
//! ```text
//! backupd start [--foreground] | stop | restart | status [--json]
//! backupd list | add <path> | remove <path> | set_interval <seconds>
//! backupd change_destination <path> | clear_destination | paste <path>
//! backupd logs [--lines N]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::{LogsArgs, StartArgs, StatusArgs},
    destination::{ChangeDestinationArgs, PasteArgs},
    items::{ItemArgs, SetIntervalArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "backupd",
    version,
    about = "Copy a list of files and directories to a backup destination on a fixed interval",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the background daemon.
    Start(StartArgs),

    /// Stop the background daemon.
    Stop,

    /// Stop the daemon if it is running, then start it.
    Restart,

    /// Report whether the daemon is running.
    Status(StatusArgs),

    /// Show the configured backup items.
    List,

    /// Add a file or directory to the backup list.
    Add(ItemArgs),

    /// Remove an entry from the backup list.
    Remove(ItemArgs),

    /// Set the number of seconds between backup cycles.
    #[command(name = "set_interval", visible_alias = "set-interval")]
    SetInterval(SetIntervalArgs),

    /// Move the backup destination, migrating existing backups.
    #[command(name = "change_destination", visible_alias = "change-destination")]
    ChangeDestination(ChangeDestinationArgs),

    /// Delete everything inside the backup destination.
    #[command(name = "clear_destination", visible_alias = "clear-destination")]
    ClearDestination,

    /// Restore the backup destination's contents into a directory.
    Paste(PasteArgs),

    /// Print recent daemon log lines.
    Logs(LogsArgs),

    /// Daemon process entry point used by `start`.
    #[command(hide = true)]
    Run,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn dispatch(command: Commands) -> Result<()> {
    // The daemon process logs to its own file instead.
    let hosts_daemon = matches!(
        command,
        Commands::Run | Commands::Start(StartArgs { foreground: true, .. })
    );
    if !hosts_daemon {
        backupd_daemon::logging::init_cli_tracing();
    }

    match command {
        Commands::Start(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Restart => commands::daemon::restart(),
        Commands::Status(args) => args.run(),
        Commands::List => commands::items::list(),
        Commands::Add(args) => args.add(),
        Commands::Remove(args) => args.remove(),
        Commands::SetInterval(args) => args.run(),
        Commands::ChangeDestination(args) => args.run(),
        Commands::ClearDestination => commands::destination::clear(),
        Commands::Paste(args) => args.run(),
        Commands::Logs(args) => args.run(),
        Commands::Run => commands::daemon::run_child(),
    }
}

/// Exit status of the first typed error in the chain, 1 otherwise.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<backupd_daemon::DaemonError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<backupd_sync::SyncError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<backupd_core::ConfigError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<backupd_core::LockError>() {
            return e.exit_code();
        }
    }
    1
}
