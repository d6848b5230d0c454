//! `backupd start|stop|restart|status|logs` and the hidden `run` entry point.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use backupd_core::paths;
use backupd_daemon::{run_daemon, DaemonStatus, ProcessController, StopOutcome, READY_LINE};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Run the scheduler in this process instead of detaching.
    #[arg(long)]
    pub foreground: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 50)]
    pub lines: usize,
}

fn controller(home: &Path) -> Result<ProcessController> {
    let exe = std::env::current_exe().context("could not locate the backupd executable")?;
    Ok(ProcessController::new(home, exe))
}

impl StartArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        if self.foreground {
            return run_daemon(&home, |marker| {
                println!("✓ backupd running in the foreground (pid {})", marker.pid);
                io::stdout().flush()
            })
            .context("daemon exited with error");
        }

        let marker = controller(&home)?
            .start()
            .context("failed to start backupd")?;
        println!("✓ backupd started (pid {})", marker.pid);
        Ok(())
    }
}

pub fn stop() -> Result<()> {
    let home = super::home()?;
    let outcome = controller(&home)?
        .stop()
        .context("failed to stop backupd")?;
    print_stop(outcome);
    Ok(())
}

pub fn restart() -> Result<()> {
    let home = super::home()?;
    let (stopped, marker) = controller(&home)?
        .restart()
        .context("failed to restart backupd")?;
    if let Some(outcome) = stopped {
        print_stop(outcome);
    }
    println!("✓ backupd started (pid {})", marker.pid);
    Ok(())
}

impl StatusArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        let status = controller(&home)?
            .status()
            .context("failed to read daemon status")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
        } else {
            print_status(&status);
        }
        Ok(())
    }
}

impl LogsArgs {
    pub fn run(&self) -> Result<()> {
        let home = super::home()?;
        print_tail(&paths::log_path(&home), self.lines).context("failed to read daemon log")
    }
}

/// Body of the detached child: report readiness on stdout, then never
/// write there again.
pub fn run_child() -> Result<()> {
    let home = super::home()?;
    run_daemon(&home, |_| {
        let mut out = io::stdout().lock();
        writeln!(out, "{READY_LINE}")?;
        out.flush()
    })
    .context("daemon exited with error")
}

fn print_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::Graceful { pid } => println!("✓ backupd stopped (pid {pid})"),
        StopOutcome::Forced { pid } => println!(
            "{} backupd did not exit in time and was killed (pid {pid})",
            "!".yellow().bold()
        ),
    }
}

fn print_status(status: &DaemonStatus) {
    match (status.pid, status.started_at) {
        (Some(pid), Some(started_at)) if status.running => println!(
            "{} backupd is running (pid {pid}, since {})",
            "●".green().bold(),
            started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        ),
        _ => println!("{} backupd is not running", "●".bright_black().bold()),
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
