//! `tripwire status`: polling state, sessions and log targets at a glance.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use tripwire_daemon::{request_status, DaemonError};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit the raw status payload as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "context")]
    context: &'static str,
    #[tabled(rename = "log target")]
    target: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_summary(&status);
        Ok(())
    }
}

fn print_summary(status: &Value) {
    let hub = &status["hub"];
    let polling = &hub["polling"];
    let state = polling["state"].as_str().unwrap_or("unknown");

    println!(
        "tripwire v{} | pid {} | up {}s",
        env!("CARGO_PKG_VERSION"),
        status["pid"],
        status["uptime_secs"],
    );
    println!(
        "polling {} {} | every {}ms | {} entries/scan | {} scans",
        state_indicator(state),
        state.to_uppercase(),
        polling["interval_ms"],
        polling["throttle"],
        polling["scans"],
    );
    println!(
        "sessions: {} poll, {} native",
        hub["poll_sessions"], hub["native_sessions"]
    );

    let rows: Vec<LogRow> = ["main", "worker", "polling"]
        .into_iter()
        .map(|context| LogRow {
            context,
            target: hub["logs"][context]
                .as_str()
                .unwrap_or("-")
                .to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if let Some(pending) = polling["pending_log"].as_str() {
        println!("{} polling log {pending} opens when polling starts", "■".yellow().bold());
    }
    if let Some(error) = polling["last_error"].as_str() {
        println!("{} {error}", "■".red().bold());
    }
}

fn state_indicator(state: &str) -> String {
    match state {
        "scanning" => "■".green().bold().to_string(),
        "scheduled" => "■".cyan().bold().to_string(),
        _ => "■".bright_black().bold().to_string(),
    }
}
