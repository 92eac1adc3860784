//! Worker thread: owns the native watcher and dispatches its events.
//!
//! The notify callback and every hub request feed the same queue, so the
//! watcher is only ever touched from this thread. Rename halves reported as
//! separate `From`/`To` events are paired by tracker id before dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::oneshot;
use tripwire_core::{ChannelId, ContextKind, EntryKind, FileSystemAction};

use crate::error::DaemonError;
use crate::session::WatchSessionRegistry;
use crate::sink_layer::enter_context;

/// How long an unmatched rename source waits for its destination.
const RENAME_WINDOW: Duration = Duration::from_millis(50);

enum WorkerMessage {
    Watch {
        channel: ChannelId,
        paths: Vec<PathBuf>,
        recursive: bool,
        respond_to: oneshot::Sender<Result<(), DaemonError>>,
    },
    Unwatch {
        channel: ChannelId,
        paths: Vec<PathBuf>,
        respond_to: oneshot::Sender<()>,
    },
    Fs(notify::Result<Event>),
    Shutdown,
}

pub struct WorkerThread {
    commands: Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    pub fn spawn(
        sessions: Arc<WatchSessionRegistry>,
        dispatch: tracing::Dispatch,
    ) -> Result<Self, DaemonError> {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let events = commands.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = events.send(WorkerMessage::Fs(res));
        })?;

        let worker = Worker {
            sessions,
            watcher,
            commands: receiver,
            roots: HashMap::new(),
            translator: EventTranslator::default(),
        };
        let handle = std::thread::Builder::new()
            .name("tripwire-worker".to_string())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || worker.run()))
            .map_err(|source| DaemonError::ThreadSpawn {
                name: "worker",
                source,
            })?;

        Ok(Self {
            commands,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Subscribe `paths` for `channel`. The session must already be
    /// registered. On failure nothing stays subscribed for this request.
    pub async fn watch(
        &self,
        channel: ChannelId,
        paths: Vec<PathBuf>,
        recursive: bool,
    ) -> Result<(), DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerMessage::Watch {
                channel,
                paths,
                recursive,
                respond_to: tx,
            })
            .map_err(|_| DaemonError::ChannelClosed("worker queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("worker response"))?
    }

    /// Drop `channel`'s interest in `paths`; roots nobody else watches are
    /// unsubscribed.
    pub async fn unwatch(&self, channel: ChannelId, paths: Vec<PathBuf>) -> Result<(), DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerMessage::Unwatch {
                channel,
                paths,
                respond_to: tx,
            })
            .map_err(|_| DaemonError::ChannelClosed("worker queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("worker response"))
    }

    pub fn shutdown(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = self.commands.send(WorkerMessage::Shutdown);
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    sessions: Arc<WatchSessionRegistry>,
    watcher: RecommendedWatcher,
    commands: Receiver<WorkerMessage>,
    /// Subscribed roots and whether the subscription is recursive.
    roots: HashMap<PathBuf, bool>,
    translator: EventTranslator,
}

impl Worker {
    fn run(mut self) {
        enter_context(ContextKind::Worker);
        tracing::debug!("worker thread started");

        loop {
            let received = if self.translator.has_pending() {
                self.commands.recv_timeout(RENAME_WINDOW)
            } else {
                self.commands
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };
            match received {
                Ok(WorkerMessage::Watch {
                    channel,
                    paths,
                    recursive,
                    respond_to,
                }) => {
                    let _ = respond_to.send(self.watch(channel, &paths, recursive));
                }
                Ok(WorkerMessage::Unwatch {
                    channel,
                    paths,
                    respond_to,
                }) => {
                    self.unwatch(channel, &paths);
                    let _ = respond_to.send(());
                }
                Ok(WorkerMessage::Fs(Ok(event))) => {
                    for change in self.translator.translate(event) {
                        self.dispatch(change);
                    }
                }
                Ok(WorkerMessage::Fs(Err(err))) => {
                    tracing::warn!(error = %err, "native watcher error");
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(change) = self.translator.flush() {
                        self.dispatch(change);
                    }
                }
                Ok(WorkerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("worker thread stopped");
    }

    fn watch(&mut self, channel: ChannelId, paths: &[PathBuf], recursive: bool) -> Result<(), DaemonError> {
        let mut added = Vec::new();
        for path in paths {
            match self.roots.get(path) {
                Some(true) => continue,
                Some(false) if !recursive => continue,
                _ => {}
            }
            let mode = if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(err) = self.watcher.watch(path, mode) {
                tracing::warn!(channel = %channel, path = %path.display(), error = %err, "native watch failed");
                self.unwatch(channel, &added);
                return Err(err.into());
            }
            self.roots.insert(path.clone(), recursive);
            added.push(path.clone());
        }
        tracing::info!(channel = %channel, roots = paths.len(), "native watch started");
        Ok(())
    }

    fn unwatch(&mut self, channel: ChannelId, paths: &[PathBuf]) {
        for path in paths {
            if self.sessions.native_root_in_use(path, channel) {
                continue;
            }
            if self.roots.remove(path).is_some() {
                if let Err(err) = self.watcher.unwatch(path) {
                    // The root may already be gone from disk.
                    tracing::debug!(path = %path.display(), error = %err, "native unwatch failed");
                }
            }
        }
    }

    fn dispatch(&self, change: Change) {
        let mut sessions = self.sessions.native_sessions_covering(&change.path);
        if let Some(old) = &change.old_path {
            for session in self.sessions.native_sessions_covering(old) {
                if !sessions.iter().any(|s| s.channel == session.channel) {
                    sessions.push(session);
                }
            }
        }
        tracing::debug!(
            action = %change.action,
            path = %change.path.display(),
            sessions = sessions.len(),
            "dispatching change",
        );
        for session in sessions {
            session.emit(
                change.action,
                change.kind,
                change.path.clone(),
                change.old_path.clone(),
            );
        }
    }
}

/// A translated native event, not yet bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Change {
    pub action: FileSystemAction,
    pub kind: EntryKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
}

impl Change {
    fn new(action: FileSystemAction, kind: EntryKind, path: PathBuf) -> Self {
        Self {
            action,
            kind,
            path,
            old_path: None,
        }
    }
}

/// Maps notify events to [`Change`]s and pairs split renames.
#[derive(Debug, Default)]
pub(crate) struct EventTranslator {
    pending_from: Option<(Option<usize>, PathBuf)>,
    last_paired: Option<usize>,
}

impl EventTranslator {
    pub fn has_pending(&self) -> bool {
        self.pending_from.is_some()
    }

    /// Give up on the pending rename source; it moved out of view.
    pub fn flush(&mut self) -> Option<Change> {
        self.pending_from.take().map(|(_, path)| {
            Change::new(FileSystemAction::Deleted, EntryKind::Unknown, path)
        })
    }

    pub fn translate(&mut self, event: Event) -> Vec<Change> {
        let tracker = event.attrs.tracker();
        let mut paths = event.paths.into_iter();
        let mut out = Vec::new();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                out.extend(self.flush());
                if let Some(path) = paths.next() {
                    self.pending_from = Some((tracker, path));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let Some(path) = paths.next() else {
                    return out;
                };
                match self.pending_from.take() {
                    Some((from_tracker, old)) if tracker.is_some() && from_tracker == tracker => {
                        self.last_paired = tracker;
                        out.push(Change {
                            action: FileSystemAction::Renamed,
                            kind: kind_on_disk(&path),
                            path,
                            old_path: Some(old),
                        });
                    }
                    other => {
                        self.pending_from = other;
                        out.extend(self.flush());
                        out.push(Change::new(FileSystemAction::Created, kind_on_disk(&path), path));
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if tracker.is_some() && tracker == self.last_paired {
                    return out;
                }
                out.extend(self.flush());
                if let (Some(old), Some(path)) = (paths.next(), paths.next()) {
                    out.push(Change {
                        action: FileSystemAction::Renamed,
                        kind: kind_on_disk(&path),
                        path,
                        old_path: Some(old),
                    });
                }
            }
            EventKind::Access(_) => {}
            kind => {
                out.extend(self.flush());
                let Some(action) = action_for(&kind) else {
                    return out;
                };
                for path in paths {
                    let entry = match kind {
                        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
                            EntryKind::File
                        }
                        EventKind::Create(CreateKind::Folder)
                        | EventKind::Remove(RemoveKind::Folder) => EntryKind::Directory,
                        EventKind::Remove(_) => EntryKind::Unknown,
                        _ => kind_on_disk(&path),
                    };
                    out.push(Change::new(action, entry, path));
                }
            }
        }
        out
    }
}

fn action_for(kind: &EventKind) -> Option<FileSystemAction> {
    match kind {
        EventKind::Create(_) => Some(FileSystemAction::Created),
        EventKind::Remove(_) => Some(FileSystemAction::Deleted),
        // Includes renames without a mode, which carry no pairing info.
        EventKind::Modify(_) | EventKind::Any => Some(FileSystemAction::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

fn kind_on_disk(path: &Path) -> EntryKind {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => EntryKind::Directory,
        Ok(meta) if meta.is_file() => EntryKind::File,
        _ => EntryKind::Unknown,
    }
}
