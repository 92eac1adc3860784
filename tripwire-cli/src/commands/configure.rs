//! `tripwire configure`: live reconfiguration of the running daemon.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use tripwire_core::{ConfigureOptions, LogTarget};
use tripwire_daemon::{request_configure, DaemonError};

/// Log target flags shared by `configure` and `watch`.
#[derive(Args, Debug, Default)]
pub struct LogArgs {
    /// Main thread log: a file path, `:stderr`, `:stdout` or `:disabled`.
    #[arg(long, value_name = "TARGET")]
    pub main_log: Option<LogTarget>,

    /// Worker thread log.
    #[arg(long, value_name = "TARGET")]
    pub worker_log: Option<LogTarget>,

    /// Polling thread log. Opens when polling starts.
    #[arg(long, value_name = "TARGET")]
    pub polling_log: Option<LogTarget>,
}

impl LogArgs {
    pub fn into_options(self) -> ConfigureOptions {
        ConfigureOptions {
            main_log: self.main_log,
            worker_log: self.worker_log,
            polling_log: self.polling_log,
            ..ConfigureOptions::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct ConfigureArgs {
    #[command(flatten)]
    pub logs: LogArgs,

    /// Milliseconds between polling scans.
    #[arg(long, value_name = "MS")]
    pub polling_interval: Option<u64>,

    /// Entries stat'ed per polling scan.
    #[arg(long, value_name = "N")]
    pub polling_throttle: Option<usize>,

    /// Emit the daemon's per-key report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ConfigureArgs {
    pub fn run(self) -> Result<()> {
        let json = self.json;
        let mut options = self.logs.into_options();
        options.polling_interval = self.polling_interval;
        options.polling_throttle = self.polling_throttle;
        if options.is_empty() {
            bail!(
                "configure requires an option object: pass at least one of --main-log, \
                 --worker-log, --polling-log, --polling-interval, --polling-throttle"
            );
        }

        let home = super::home()?;
        let report = match request_configure(&home, Some(&options)) {
            Ok(report) => report,
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                return Err(err).context("start it with `tripwire daemon start`");
            }
            Err(err) => return Err(err).context("configure failed"),
        };

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report JSON")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &Value) {
    let Some(keys) = report.as_object() else {
        return;
    };
    for (key, outcome) in keys {
        let status = outcome["status"].as_str().unwrap_or("unknown");
        let line = match status {
            "active" => match outcome["replaced"].as_str() {
                Some(previous) => format!("{} (replaced {previous})", "active".green()),
                None => "active".green().to_string(),
            },
            "deferred" => format!("{} until polling starts", "deferred".yellow()),
            "applied" => "applied".green().to_string(),
            other => other.to_string(),
        };
        println!("{key:<16} {line}");
    }
}
