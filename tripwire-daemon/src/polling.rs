//! Polling thread and its lifecycle.
//!
//! ```text
//!            session added            interval elapsed
//! Stopped ─────────────────▶ Scheduled ─────────────────▶ Scanning
//!    ▲                          │  ▲                          │
//!    │   last session removed   │  └──── sessions remain ─────┤
//!    └──────────────────────────┴──────── none remain ────────┘
//! ```
//!
//! Every request reaches the thread through one command queue and is handled
//! between phases, never during a scan. A request that arrives mid-scan
//! waits in the queue until the scan ends, which makes the end of a scan the
//! safe point for swapping the polling log. While `Stopped`, a polling log
//! request is only recorded; the sink opens when the thread next leaves
//! `Stopped`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tripwire_core::{ContextKind, LogTarget};

use crate::coordinator::Activation;
use crate::error::{ConfigureError, DaemonError};
use crate::log_registry::ThreadLogRegistry;
use crate::scan::Scanner;
use crate::session::WatchSessionRegistry;
use crate::sink_layer::enter_context;

const AUDIT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingState {
    Stopped,
    Scheduled,
    Scanning,
}

/// A configuration change that must land between scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingChange {
    Log(LogTarget),
    Interval(Duration),
    Throttle(usize),
}

/// Audit trail entry, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollingAudit {
    Transition { from: PollingState, to: PollingState },
    LogDeferred { target: LogTarget },
    LogSwapped { target: LogTarget },
    LogFailed { target: LogTarget, error: String },
    ParametersChanged { interval_ms: u64, throttle: usize },
    ScanFinished { entries: usize, events: usize, errors: usize },
}

/// Observable snapshot of the polling thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingStatus {
    pub state: PollingState,
    pub interval_ms: u64,
    pub throttle: usize,
    /// Polling log recorded while stopped, not yet opened.
    pub pending_log: Option<LogTarget>,
    /// Last failure to open a deferred polling log.
    pub last_error: Option<String>,
    pub scans: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PollingSettings {
    pub interval: Duration,
    pub throttle: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(tripwire_core::config::DEFAULT_POLLING_INTERVAL_MS),
            throttle: tripwire_core::config::DEFAULT_POLLING_THROTTLE,
        }
    }
}

enum PollingCommand {
    Configure {
        change: PollingChange,
        respond_to: oneshot::Sender<Result<Activation, ConfigureError>>,
    },
    SessionsChanged {
        respond_to: oneshot::Sender<PollingState>,
    },
    Shutdown,
}

type AuditLog = Arc<Mutex<VecDeque<PollingAudit>>>;

/// Handle to the polling thread. Owns no state itself; every mutation goes
/// through the thread's command queue.
pub struct PollingCycleController {
    commands: Sender<PollingCommand>,
    status: watch::Receiver<PollingStatus>,
    audit: AuditLog,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PollingCycleController {
    pub fn spawn(
        logs: Arc<ThreadLogRegistry>,
        sessions: Arc<WatchSessionRegistry>,
        scanner: Box<dyn Scanner>,
        settings: PollingSettings,
        dispatch: tracing::Dispatch,
    ) -> Result<Self, DaemonError> {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let (status_tx, status) = watch::channel(PollingStatus {
            state: PollingState::Stopped,
            interval_ms: settings.interval.as_millis() as u64,
            throttle: settings.throttle,
            pending_log: None,
            last_error: None,
            scans: 0,
        });
        let audit: AuditLog = Arc::new(Mutex::new(VecDeque::new()));

        let thread = PollingThread {
            logs,
            sessions,
            scanner,
            commands: receiver,
            status: status_tx,
            audit: Arc::clone(&audit),
            state: PollingState::Stopped,
            interval: settings.interval,
            throttle: settings.throttle,
            pending_log: None,
            next_scan: Instant::now(),
        };
        let handle = std::thread::Builder::new()
            .name("tripwire-polling".to_string())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || thread.run()))
            .map_err(|source| DaemonError::ThreadSpawn {
                name: "polling",
                source,
            })?;

        Ok(Self {
            commands,
            status,
            audit,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue `change` and wait until the thread applied it at a safe point:
    /// immediately when stopped or scheduled, at the end of the scan when
    /// scanning.
    pub async fn with_quiescence(
        &self,
        change: PollingChange,
    ) -> Result<Activation, ConfigureError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PollingCommand::Configure {
                change,
                respond_to: tx,
            })
            .map_err(|_| ConfigureError::ChannelClosed("polling queue"))?;
        rx.await
            .map_err(|_| ConfigureError::ChannelClosed("polling response"))?
    }

    /// Tell the thread the set of poll sessions changed. Resolves once the
    /// thread re-evaluated its state (and opened a deferred log, if it left
    /// `Stopped`).
    pub async fn sessions_changed(&self) -> Result<PollingState, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PollingCommand::SessionsChanged { respond_to: tx })
            .map_err(|_| DaemonError::ChannelClosed("polling queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("polling response"))
    }

    pub fn state(&self) -> PollingState {
        self.status.borrow().state
    }

    pub fn status(&self) -> PollingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollingStatus> {
        self.status.clone()
    }

    pub fn audit(&self) -> Vec<PollingAudit> {
        self.audit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stop the thread and wait for it. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = self.commands.send(PollingCommand::Shutdown);
            if handle.join().is_err() {
                tracing::error!("polling thread panicked");
            }
        }
    }
}

impl Drop for PollingCycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PollingThread {
    logs: Arc<ThreadLogRegistry>,
    sessions: Arc<WatchSessionRegistry>,
    scanner: Box<dyn Scanner>,
    commands: Receiver<PollingCommand>,
    status: watch::Sender<PollingStatus>,
    audit: AuditLog,
    state: PollingState,
    interval: Duration,
    throttle: usize,
    pending_log: Option<LogTarget>,
    next_scan: Instant,
}

impl PollingThread {
    fn run(mut self) {
        enter_context(ContextKind::Polling);
        tracing::debug!("polling thread started");

        loop {
            let received = match self.state {
                PollingState::Stopped => self
                    .commands
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
                PollingState::Scheduled | PollingState::Scanning => {
                    self.commands.recv_deadline(self.next_scan)
                }
            };
            let keep_running = match received {
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => self.run_cycle(),
                Err(RecvTimeoutError::Disconnected) => false,
            };
            if !keep_running {
                break;
            }
        }

        self.transition(PollingState::Stopped);
        tracing::debug!("polling thread stopped");
    }

    /// Returns `false` on shutdown.
    fn handle(&mut self, command: PollingCommand) -> bool {
        match command {
            PollingCommand::Configure { change, respond_to } => {
                let result = self.apply(change);
                let _ = respond_to.send(result);
            }
            PollingCommand::SessionsChanged { respond_to } => {
                self.reevaluate();
                let _ = respond_to.send(self.state);
            }
            PollingCommand::Shutdown => return false,
        }
        true
    }

    fn apply(&mut self, change: PollingChange) -> Result<Activation, ConfigureError> {
        match change {
            PollingChange::Log(target) if self.state == PollingState::Stopped => {
                tracing::debug!(log = %target, "polling stopped; deferring log swap");
                self.record(PollingAudit::LogDeferred {
                    target: target.clone(),
                });
                self.pending_log = Some(target.clone());
                self.status.send_modify(|status| status.pending_log = Some(target));
                Ok(Activation::Deferred)
            }
            PollingChange::Log(target) => {
                // An explicit request supersedes anything recorded earlier.
                self.pending_log = None;
                self.status.send_modify(|status| status.pending_log = None);
                self.swap_log(target)
            }
            PollingChange::Interval(interval) => {
                self.interval = interval;
                if self.state == PollingState::Scheduled {
                    self.next_scan = Instant::now() + interval;
                }
                self.parameters_changed();
                Ok(Activation::Applied)
            }
            PollingChange::Throttle(throttle) => {
                self.throttle = throttle;
                self.parameters_changed();
                Ok(Activation::Applied)
            }
        }
    }

    fn swap_log(&mut self, target: LogTarget) -> Result<Activation, ConfigureError> {
        match self.logs.swap(ContextKind::Polling, target.clone()) {
            Ok(outcome) => {
                self.record(PollingAudit::LogSwapped {
                    target: target.clone(),
                });
                self.status.send_modify(|status| status.last_error = None);
                tracing::info!(log = %target, "polling log swapped");
                Ok(Activation::from(outcome))
            }
            Err(err) => {
                self.record(PollingAudit::LogFailed {
                    target,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Leave or enter `Stopped` according to the registered poll sessions.
    fn reevaluate(&mut self) {
        let wanted = self.sessions.has_poll_sessions();
        match (self.state, wanted) {
            (PollingState::Stopped, true) => {
                self.activate_pending_log();
                self.transition(PollingState::Scheduled);
                // Baseline new sessions right away.
                self.next_scan = Instant::now();
            }
            (PollingState::Scheduled, false) => self.transition(PollingState::Stopped),
            _ => {}
        }
    }

    fn activate_pending_log(&mut self) {
        let Some(target) = self.pending_log.take() else {
            return;
        };
        self.status.send_modify(|status| status.pending_log = None);
        if let Err(err) = self.swap_log(target.clone()) {
            tracing::error!(log = %target, error = %err, "deferred polling log failed to open");
            let message = err.to_string();
            self.status
                .send_modify(|status| status.last_error = Some(message));
        }
    }

    /// One full cycle: Scanning, then back to Scheduled or Stopped, then
    /// whatever queued up during the scan. Returns `false` on shutdown.
    fn run_cycle(&mut self) -> bool {
        let sessions = self.sessions.poll_sessions();
        if sessions.is_empty() {
            self.transition(PollingState::Stopped);
            return true;
        }

        self.transition(PollingState::Scanning);
        let started = Instant::now();
        let report = self.scanner.scan(&sessions, self.throttle);
        tracing::debug!(
            sessions = report.sessions_scanned,
            entries = report.entries_checked,
            events = report.events,
            errors = report.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished",
        );
        self.record(PollingAudit::ScanFinished {
            entries: report.entries_checked,
            events: report.events,
            errors: report.errors,
        });
        self.status.send_modify(|status| status.scans += 1);

        if self.sessions.has_poll_sessions() {
            self.transition(PollingState::Scheduled);
            self.next_scan = Instant::now() + self.interval;
        } else {
            self.transition(PollingState::Stopped);
        }

        while let Ok(command) = self.commands.try_recv() {
            if !self.handle(command) {
                return false;
            }
        }
        true
    }

    fn parameters_changed(&mut self) {
        let interval_ms = self.interval.as_millis() as u64;
        let throttle = self.throttle;
        self.record(PollingAudit::ParametersChanged {
            interval_ms,
            throttle,
        });
        self.status.send_modify(|status| {
            status.interval_ms = interval_ms;
            status.throttle = throttle;
        });
        tracing::info!(interval_ms, throttle, "polling parameters changed");
    }

    fn transition(&mut self, to: PollingState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.record(PollingAudit::Transition { from, to });
        self.status.send_modify(|status| status.state = to);
        tracing::debug!(from = ?from, to = ?to, "polling state changed");
    }

    fn record(&self, entry: PollingAudit) {
        let mut audit = self.audit.lock().unwrap_or_else(PoisonError::into_inner);
        if audit.len() == AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(entry);
    }
}
