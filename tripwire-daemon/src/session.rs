//! Registry of active watch sessions.
//!
//! Sessions are created and removed by the hub; the worker and polling
//! threads only read them to decide where events go and whether a polling
//! cycle has anything to do.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tripwire_core::{ChannelId, EntryKind, FileSystemAction, FileSystemEvent, WatchOptions};

#[derive(Debug)]
pub struct WatchSession {
    pub channel: ChannelId,
    pub paths: Vec<PathBuf>,
    pub options: WatchOptions,
    events: mpsc::UnboundedSender<FileSystemEvent>,
}

impl WatchSession {
    /// Deliver one event. Returns `false` once the receiving side is gone.
    pub fn emit(
        &self,
        action: FileSystemAction,
        kind: EntryKind,
        path: PathBuf,
        old_path: Option<PathBuf>,
    ) -> bool {
        self.events
            .send(FileSystemEvent {
                channel: self.channel,
                action,
                kind,
                path,
                old_path,
            })
            .is_ok()
    }

    /// Whether `path` falls under one of this session's roots.
    pub fn covers(&self, path: &Path) -> bool {
        self.paths.iter().any(|root| {
            if self.options.recursive {
                path.starts_with(root)
            } else {
                path == root || path.parent() == Some(root.as_path())
            }
        })
    }
}

/// The consumer side of a session, returned by `Hub::watch`.
#[derive(Debug)]
pub struct WatchHandle {
    pub channel: ChannelId,
    pub events: mpsc::UnboundedReceiver<FileSystemEvent>,
}

#[derive(Debug, Default)]
pub struct WatchSessionRegistry {
    sessions: RwLock<BTreeMap<ChannelId, Arc<WatchSession>>>,
    next_channel: AtomicU64,
}

impl WatchSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under a fresh channel id.
    pub fn open(&self, paths: Vec<PathBuf>, options: WatchOptions) -> (Arc<WatchSession>, WatchHandle) {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(WatchSession {
            channel,
            paths,
            options,
            events: tx,
        });
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, Arc::clone(&session));
        (session, WatchHandle { channel, events: rx })
    }

    pub fn remove(&self, channel: ChannelId) -> Option<Arc<WatchSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel)
    }

    pub fn get(&self, channel: ChannelId) -> Option<Arc<WatchSession>> {
        self.read().get(&channel).cloned()
    }

    /// Sessions served by the polling thread, in channel order.
    pub fn poll_sessions(&self) -> Vec<Arc<WatchSession>> {
        self.filtered(|session| session.options.poll)
    }

    /// Sessions served by native notifications, in channel order.
    pub fn native_sessions(&self) -> Vec<Arc<WatchSession>> {
        self.filtered(|session| !session.options.poll)
    }

    pub fn has_poll_sessions(&self) -> bool {
        self.read().values().any(|session| session.options.poll)
    }

    /// `(poll, native)` session counts.
    pub fn counts(&self) -> (usize, usize) {
        let sessions = self.read();
        let poll = sessions.values().filter(|s| s.options.poll).count();
        (poll, sessions.len() - poll)
    }

    /// Native sessions whose roots cover `path`.
    pub fn native_sessions_covering(&self, path: &Path) -> Vec<Arc<WatchSession>> {
        self.filtered(|session| !session.options.poll && session.covers(path))
    }

    /// Whether any native session other than `except` still watches `root`.
    pub fn native_root_in_use(&self, root: &Path, except: ChannelId) -> bool {
        self.read().values().any(|session| {
            session.channel != except
                && !session.options.poll
                && session.paths.iter().any(|p| p == root)
        })
    }

    fn filtered(&self, keep: impl Fn(&WatchSession) -> bool) -> Vec<Arc<WatchSession>> {
        self.read()
            .values()
            .filter(|session| keep(session))
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ChannelId, Arc<WatchSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_unique_and_increasing() {
        let registry = WatchSessionRegistry::new();
        let (a, _ha) = registry.open(vec![], WatchOptions::default());
        let (b, _hb) = registry.open(vec![], WatchOptions::polling());
        assert!(b.channel > a.channel);
        assert_eq!(registry.counts(), (1, 1));
    }

    #[test]
    fn poll_flag_partitions_sessions() {
        let registry = WatchSessionRegistry::new();
        assert!(!registry.has_poll_sessions());
        let (poll, _h) = registry.open(vec![PathBuf::from("/net/share")], WatchOptions::polling());
        registry.open(vec![PathBuf::from("/home/me")], WatchOptions::default());

        assert!(registry.has_poll_sessions());
        assert_eq!(registry.poll_sessions().len(), 1);
        assert_eq!(registry.native_sessions().len(), 1);

        registry.remove(poll.channel);
        assert!(!registry.has_poll_sessions());
    }

    #[test]
    fn coverage_respects_recursion() {
        let registry = WatchSessionRegistry::new();
        let (deep, _h1) = registry.open(vec![PathBuf::from("/w")], WatchOptions::default());
        let (flat, _h2) = registry.open(
            vec![PathBuf::from("/w")],
            WatchOptions {
                poll: false,
                recursive: false,
            },
        );

        assert!(deep.covers(Path::new("/w/a/b.txt")));
        assert!(flat.covers(Path::new("/w/a")));
        assert!(!flat.covers(Path::new("/w/a/b.txt")));
        assert!(!deep.covers(Path::new("/other")));

        let covering = registry.native_sessions_covering(Path::new("/w/a/b.txt"));
        assert_eq!(covering.len(), 1);
        assert_eq!(covering[0].channel, deep.channel);
    }

    #[test]
    fn shared_roots_are_detected() {
        let registry = WatchSessionRegistry::new();
        let root = PathBuf::from("/w");
        let (a, _h1) = registry.open(vec![root.clone()], WatchOptions::default());
        assert!(!registry.native_root_in_use(&root, a.channel));
        let (b, _h2) = registry.open(vec![root.clone()], WatchOptions::default());
        assert!(registry.native_root_in_use(&root, a.channel));
        assert!(registry.native_root_in_use(&root, b.channel));
    }

    #[tokio::test]
    async fn emitted_events_reach_the_handle() {
        let registry = WatchSessionRegistry::new();
        let (session, mut handle) = registry.open(vec![], WatchOptions::polling());
        assert!(session.emit(
            FileSystemAction::Created,
            EntryKind::File,
            PathBuf::from("/w/new.txt"),
            None,
        ));
        let event = handle.events.recv().await.expect("event");
        assert_eq!(event.channel, handle.channel);
        assert_eq!(event.action, FileSystemAction::Created);

        drop(handle);
        assert!(!session.emit(FileSystemAction::Deleted, EntryKind::File, PathBuf::from("/w/new.txt"), None));
    }
}
