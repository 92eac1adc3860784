//! tripwire: file watcher with live log reconfiguration.
//!
//! # Usage
//!
//! ```text
//! tripwire daemon start|stop|status|logs
//! tripwire configure [--main-log T] [--worker-log T] [--polling-log T]
//!                    [--polling-interval MS] [--polling-throttle N] [--json]
//! tripwire status [--json]
//! tripwire watch <path>... [--poll] [--flat] [--json]
//! ```
//!
//! A log target `T` is a file path or one of `:stderr`, `:stdout`, `:disabled`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    configure::ConfigureArgs, daemon::DaemonCommand, status::StatusArgs, watch::WatchArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tripwire",
    version,
    about = "Watch files, and redirect the watcher's logs while it runs",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and control the background watcher daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Redirect the running daemon's logs or change its polling parameters.
    Configure(ConfigureArgs),

    /// Show the running daemon's polling state, sessions and log targets.
    Status(StatusArgs),

    /// Watch paths in the foreground and print every change.
    Watch(WatchArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Configure(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Watch(args) => args.run(),
    }
}
