//! `tripwire daemon`: background watcher lifecycle.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use tripwire_core::LogTarget;
use tripwire_daemon::paths::socket_path;
use tripwire_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watchers + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Print daemon runtime status as JSON.
    Status,
    /// Print recent lines of the daemon's file logs.
    Logs(DaemonLogsArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ContextArg {
    Main,
    Worker,
    Polling,
}

impl ContextArg {
    fn key(self) -> &'static str {
        match self {
            ContextArg::Main => "main",
            ContextArg::Worker => "worker",
            ContextArg::Polling => "polling",
        }
    }
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only this context's log.
    #[arg(long, value_enum)]
    pub context: Option<ContextArg>,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Logs(args) => {
            let status = request_status(&home).context("failed to query daemon status")?;
            let contexts = match args.context {
                Some(context) => vec![context],
                None => vec![ContextArg::Main, ContextArg::Worker, ContextArg::Polling],
            };
            for context in contexts {
                match status["hub"]["logs"][context.key()].as_str().map(LogTarget::from) {
                    Some(LogTarget::File(path)) => print_tail(&path, args.lines)
                        .with_context(|| format!("failed to read {} log", context.key()))?,
                    Some(other) => println!("{} log goes to {other}", context.key()),
                    None => println!("{} log is not configured", context.key()),
                }
            }
        }
    }

    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
