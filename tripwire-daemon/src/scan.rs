//! One polling scan: walk each session's roots, compare against the previous
//! snapshot, and emit the differences.

use std::collections::{BTreeMap, HashMap};
use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tripwire_core::{ChannelId, EntryKind, FileSystemAction};
use walkdir::WalkDir;

use crate::session::WatchSession;

/// Summary of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub sessions_scanned: usize,
    pub entries_checked: usize,
    pub events: usize,
    pub errors: usize,
}

/// The work done while the polling controller is `Scanning`.
///
/// `budget` is the soft limit of entries to stat. Implementations must return
/// in bounded time.
pub trait Scanner: Send + 'static {
    fn scan(&mut self, sessions: &[Arc<WatchSession>], budget: usize) -> ScanReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryStat {
    kind: EntryKind,
    len: u64,
    modified: Option<SystemTime>,
}

impl EntryStat {
    fn from_metadata(meta: &Metadata) -> Self {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Unknown
        };
        Self {
            kind,
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

type Snapshot = BTreeMap<PathBuf, EntryStat>;

/// Stat-based scanner over the real filesystem.
///
/// Sessions are scanned whole, round-robin: once `budget` entries have been
/// checked the remaining sessions wait for the next scan. At least one
/// session is scanned each time. A session's first scan records a baseline
/// and emits nothing.
#[derive(Debug, Default)]
pub struct FsScanner {
    snapshots: HashMap<ChannelId, Snapshot>,
    cursor: usize,
}

impl FsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan_session(&mut self, session: &WatchSession, report: &mut ScanReport) {
        let current = collect(session, report);
        if let Some(previous) = self.snapshots.get(&session.channel) {
            report.events += emit_changes(session, previous, &current);
        }
        self.snapshots.insert(session.channel, current);
    }
}

impl Scanner for FsScanner {
    fn scan(&mut self, sessions: &[Arc<WatchSession>], budget: usize) -> ScanReport {
        self.snapshots
            .retain(|channel, _| sessions.iter().any(|s| s.channel == *channel));

        let mut report = ScanReport::default();
        if sessions.is_empty() {
            return report;
        }

        let start = self.cursor % sessions.len();
        for offset in 0..sessions.len() {
            if offset > 0 && report.entries_checked >= budget {
                break;
            }
            let session = &sessions[(start + offset) % sessions.len()];
            self.scan_session(session, &mut report);
            report.sessions_scanned += 1;
        }
        self.cursor = start + report.sessions_scanned;
        report
    }
}

fn collect(session: &WatchSession, report: &mut ScanReport) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for root in &session.paths {
        let mut walker = WalkDir::new(root).follow_links(false);
        if !session.options.recursive {
            walker = walker.max_depth(1);
        }
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Entries vanishing mid-walk are expected on busy shares.
                    tracing::debug!(root = %root.display(), error = %err, "scan walk error");
                    report.errors += 1;
                    continue;
                }
            };
            match entry.metadata() {
                Ok(meta) => {
                    report.entries_checked += 1;
                    snapshot.insert(entry.into_path(), EntryStat::from_metadata(&meta));
                }
                Err(err) => {
                    tracing::debug!(path = %entry.path().display(), error = %err, "stat failed");
                    report.errors += 1;
                }
            }
        }
    }
    snapshot
}

fn emit_changes(session: &WatchSession, previous: &Snapshot, current: &Snapshot) -> usize {
    let mut emitted = 0;

    for (path, stat) in previous {
        if !current.contains_key(path) {
            session.emit(FileSystemAction::Deleted, stat.kind, path.clone(), None);
            emitted += 1;
        }
    }

    for (path, stat) in current {
        match previous.get(path) {
            None => {
                session.emit(FileSystemAction::Created, stat.kind, path.clone(), None);
                emitted += 1;
            }
            // Directory mtimes move whenever a child changes; the child's own
            // event already covers that.
            Some(old) if old.kind == EntryKind::Directory && stat.kind == EntryKind::Directory => {}
            Some(old) if old != stat => {
                session.emit(FileSystemAction::Modified, stat.kind, path.clone(), None);
                emitted += 1;
            }
            Some(_) => {}
        }
    }

    emitted
}
