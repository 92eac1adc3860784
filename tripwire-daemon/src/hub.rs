//! The watcher service as one object: log registry, session registry,
//! worker thread, polling thread, and the configure entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tripwire_core::{ChannelId, ConfigureOptions, ContextKind, LogTarget, WatchOptions};

use crate::coordinator::{ConfigurationCoordinator, ConfigureReport};
use crate::error::{io_err, ConfigureError, DaemonError};
use crate::log_registry::ThreadLogRegistry;
use crate::log_rotation::RotationPolicy;
use crate::polling::{PollingAudit, PollingCycleController, PollingSettings, PollingStatus};
use crate::scan::{FsScanner, Scanner};
use crate::session::{WatchHandle, WatchSessionRegistry};
use crate::worker::WorkerThread;

/// Builder for [`Hub`].
///
/// ```no_run
/// # async fn demo() -> Result<(), tripwire_daemon::DaemonError> {
/// use std::time::Duration;
/// use tripwire_daemon::Hub;
///
/// let hub = Hub::builder()
///     .polling_interval(Duration::from_millis(250))
///     .start()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HubBuilder {
    logs: Option<Arc<ThreadLogRegistry>>,
    scanner: Option<Box<dyn Scanner>>,
    settings: PollingSettings,
    rotation: RotationPolicy,
}

impl HubBuilder {
    /// Share an existing registry, e.g. the one behind the process's
    /// tracing layer. Its own rotation policy applies.
    pub fn logs(mut self, logs: Arc<ThreadLogRegistry>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn scanner(mut self, scanner: impl Scanner) -> Self {
        self.scanner = Some(Box::new(scanner));
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    pub fn polling_throttle(mut self, throttle: usize) -> Self {
        self.settings.throttle = throttle;
        self
    }

    pub fn rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    /// Spawn the worker and polling threads. Both inherit the caller's
    /// tracing dispatcher.
    pub fn start(self) -> Result<Hub, DaemonError> {
        let dispatch = tracing::dispatcher::get_default(|dispatch| dispatch.clone());
        let logs = self
            .logs
            .unwrap_or_else(|| Arc::new(ThreadLogRegistry::with_rotation(self.rotation)));
        let sessions = Arc::new(WatchSessionRegistry::new());
        let scanner = self
            .scanner
            .unwrap_or_else(|| Box::new(FsScanner::new()));

        let polling = Arc::new(PollingCycleController::spawn(
            Arc::clone(&logs),
            Arc::clone(&sessions),
            scanner,
            self.settings,
            dispatch.clone(),
        )?);
        let worker = WorkerThread::spawn(Arc::clone(&sessions), dispatch)?;
        let coordinator = ConfigurationCoordinator::new(Arc::clone(&logs), Arc::clone(&polling));

        tracing::debug!(
            interval_ms = self.settings.interval.as_millis() as u64,
            throttle = self.settings.throttle,
            "hub started",
        );
        Ok(Hub {
            logs,
            sessions,
            polling,
            worker,
            coordinator,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Active target per context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStatus {
    pub main: Option<LogTarget>,
    pub worker: Option<LogTarget>,
    pub polling: Option<LogTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStatus {
    pub polling: PollingStatus,
    pub poll_sessions: usize,
    pub native_sessions: usize,
    pub logs: LogStatus,
}

pub struct Hub {
    logs: Arc<ThreadLogRegistry>,
    sessions: Arc<WatchSessionRegistry>,
    polling: Arc<PollingCycleController>,
    worker: WorkerThread,
    coordinator: ConfigurationCoordinator,
    shut_down: AtomicBool,
}

impl Hub {
    pub fn builder() -> HubBuilder {
        HubBuilder::default()
    }

    /// Start with default settings and the filesystem scanner.
    pub fn start() -> Result<Self, DaemonError> {
        HubBuilder::default().start()
    }

    /// See [`ConfigurationCoordinator::configure`].
    pub async fn configure(
        &self,
        options: Option<ConfigureOptions>,
    ) -> Result<ConfigureReport, ConfigureError> {
        self.coordinator.configure(options).await
    }

    /// Open a watch session over `paths`.
    ///
    /// Poll sessions resolve once the polling thread has left `Stopped`, with
    /// any deferred polling log opened. Native sessions resolve once every
    /// root is subscribed.
    pub async fn watch(
        &self,
        paths: Vec<PathBuf>,
        options: WatchOptions,
    ) -> Result<WatchHandle, DaemonError> {
        if paths.is_empty() {
            return Err(DaemonError::InvalidWatch(
                "at least one path is required".to_string(),
            ));
        }
        let roots = paths
            .iter()
            .map(|path| fs::canonicalize(path).map_err(|e| io_err(path, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let (session, handle) = self.sessions.open(roots.clone(), options);
        let channel = session.channel;
        let started = if options.poll {
            self.polling.sessions_changed().await.map(|_| ())
        } else {
            self.worker.watch(channel, roots, options.recursive).await
        };
        if let Err(err) = started {
            self.sessions.remove(channel);
            return Err(err);
        }

        tracing::info!(
            channel = %channel,
            poll = options.poll,
            recursive = options.recursive,
            roots = session.paths.len(),
            "watch started",
        );
        Ok(handle)
    }

    /// Close the session behind `channel`. Its handle stops receiving events.
    pub async fn unwatch(&self, channel: ChannelId) -> Result<(), DaemonError> {
        let session = self
            .sessions
            .remove(channel)
            .ok_or(DaemonError::UnknownChannel(channel))?;
        if session.options.poll {
            self.polling.sessions_changed().await?;
        } else {
            self.worker.unwatch(channel, session.paths.clone()).await?;
        }
        tracing::info!(channel = %channel, "watch stopped");
        Ok(())
    }

    pub fn status(&self) -> HubStatus {
        let (poll_sessions, native_sessions) = self.sessions.counts();
        HubStatus {
            polling: self.polling.status(),
            poll_sessions,
            native_sessions,
            logs: LogStatus {
                main: self.logs.active_target(ContextKind::Main),
                worker: self.logs.active_target(ContextKind::Worker),
                polling: self.logs.active_target(ContextKind::Polling),
            },
        }
    }

    pub fn polling_status(&self) -> watch::Receiver<PollingStatus> {
        self.polling.subscribe()
    }

    pub fn polling_audit(&self) -> Vec<PollingAudit> {
        self.polling.audit()
    }

    pub fn logs(&self) -> &Arc<ThreadLogRegistry> {
        &self.logs
    }

    /// Stop both threads and close every sink. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("hub shutting down");
        self.polling.shutdown();
        self.worker.shutdown();
        for (context, err) in self.logs.close_all() {
            tracing::warn!(context = %context, error = %err, "final log flush failed");
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
