//! `tripwire watch`: foreground watch session, no daemon involved.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tripwire_core::{FileSystemAction, FileSystemEvent, WatchOptions};
use tripwire_daemon::{init_tracing, Hub, ThreadLogRegistry};

use super::configure::LogArgs;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Paths to watch.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Poll instead of using native notifications (network shares).
    #[arg(long)]
    pub poll: bool,

    /// Do not descend into subdirectories.
    #[arg(long)]
    pub flat: bool,

    /// Milliseconds between polling scans.
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub polling_interval: u64,

    /// One JSON object per event.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub logs: LogArgs,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let logs = Arc::new(ThreadLogRegistry::new());
        init_tracing(Arc::clone(&logs));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        runtime.block_on(self.watch(logs))
    }

    async fn watch(self, logs: Arc<ThreadLogRegistry>) -> Result<()> {
        let hub = Hub::builder()
            .logs(logs)
            .polling_interval(Duration::from_millis(self.polling_interval.max(1)))
            .start()
            .context("failed to start watcher")?;

        let options = self.logs.into_options();
        if !options.is_empty() {
            hub.configure(Some(options))
                .await
                .context("invalid log options")?
                .into_result()
                .context("failed to open log")?;
        }

        let mut handle = hub
            .watch(
                self.paths,
                WatchOptions {
                    poll: self.poll,
                    recursive: !self.flat,
                },
            )
            .await
            .context("failed to start watching")?;

        loop {
            tokio::select! {
                event = handle.events.recv() => {
                    let Some(event) = event else { break };
                    print_event(&event, self.json)?;
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("ctrl-c handler failed")?;
                    break;
                }
            }
        }

        hub.shutdown();
        Ok(())
    }
}

fn print_event(event: &FileSystemEvent, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(event).context("failed to serialize event")?
        );
        return Ok(());
    }
    let action = match event.action {
        FileSystemAction::Created => "created".green(),
        FileSystemAction::Deleted => "deleted".red(),
        FileSystemAction::Modified => "modified".yellow(),
        FileSystemAction::Renamed => "renamed".cyan(),
    };
    match &event.old_path {
        Some(old) => println!("{action:<9} {} -> {}", old.display(), event.path.display()),
        None => println!("{action:<9} {}", event.path.display()),
    }
    Ok(())
}
