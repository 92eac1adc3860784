//! Domain types shared by the watcher daemon and its CLI.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Everything that crosses the socket or the config file is serde-serializable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a watch session. Every event carries the channel it was
/// produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Execution contexts
// ---------------------------------------------------------------------------

/// One of the three threads of control that own an independent log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Main,
    Worker,
    Polling,
}

impl ContextKind {
    pub const ALL: [ContextKind; 3] = [ContextKind::Main, ContextKind::Worker, ContextKind::Polling];

    /// Dense index, used by per-context tables.
    pub fn index(self) -> usize {
        match self {
            ContextKind::Main => 0,
            ContextKind::Worker => 1,
            ContextKind::Polling => 2,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Main => write!(f, "main"),
            ContextKind::Worker => write!(f, "worker"),
            ContextKind::Polling => write!(f, "polling"),
        }
    }
}

// ---------------------------------------------------------------------------
// Log targets
// ---------------------------------------------------------------------------

/// Where a context's diagnostic output goes.
///
/// Serialized as a plain string: a filesystem path, or one of the reserved
/// names `:stderr`, `:stdout`, `:disabled`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
    Stdout,
    Disabled,
}

impl LogTarget {
    pub const STDERR: &'static str = ":stderr";
    pub const STDOUT: &'static str = ":stdout";
    pub const DISABLED: &'static str = ":disabled";

    /// Name of the sink kind, as written in the opened sentinel line.
    pub fn sink_kind(&self) -> &'static str {
        match self {
            LogTarget::File(_) => "FileLogger",
            LogTarget::Stderr => "StderrLogger",
            LogTarget::Stdout => "StdoutLogger",
            LogTarget::Disabled => "NullLogger",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LogTarget::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::File(path) => write!(f, "{}", path.display()),
            LogTarget::Stderr => f.write_str(Self::STDERR),
            LogTarget::Stdout => f.write_str(Self::STDOUT),
            LogTarget::Disabled => f.write_str(Self::DISABLED),
        }
    }
}

impl From<String> for LogTarget {
    fn from(s: String) -> Self {
        match s.as_str() {
            Self::STDERR => LogTarget::Stderr,
            Self::STDOUT => LogTarget::Stdout,
            Self::DISABLED => LogTarget::Disabled,
            _ => LogTarget::File(PathBuf::from(s)),
        }
    }
}

impl From<&str> for LogTarget {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<PathBuf> for LogTarget {
    fn from(path: PathBuf) -> Self {
        LogTarget::File(path)
    }
}

impl From<&Path> for LogTarget {
    fn from(path: &Path) -> Self {
        LogTarget::File(path.to_path_buf())
    }
}

impl From<LogTarget> for String {
    fn from(target: LogTarget) -> Self {
        target.to_string()
    }
}

impl FromStr for LogTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

// ---------------------------------------------------------------------------
// Configuration request
// ---------------------------------------------------------------------------

/// The option object accepted by `configure`.
///
/// Every key is optional; an option object with no key set is rejected by the
/// coordinator. Unknown keys are rejected at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigureOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_log: Option<LogTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_log: Option<LogTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_log: Option<LogTarget>,
    /// Milliseconds between the end of one scan and the start of the next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<u64>,
    /// Soft budget of stat calls per scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_throttle: Option<usize>,
}

impl ConfigureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn main_log(mut self, target: impl Into<LogTarget>) -> Self {
        self.main_log = Some(target.into());
        self
    }

    pub fn worker_log(mut self, target: impl Into<LogTarget>) -> Self {
        self.worker_log = Some(target.into());
        self
    }

    pub fn polling_log(mut self, target: impl Into<LogTarget>) -> Self {
        self.polling_log = Some(target.into());
        self
    }

    pub fn polling_interval(mut self, millis: u64) -> Self {
        self.polling_interval = Some(millis);
        self
    }

    pub fn polling_throttle(mut self, entries: usize) -> Self {
        self.polling_throttle = Some(entries);
        self
    }

    /// `true` when no recognized key is set.
    pub fn is_empty(&self) -> bool {
        self.main_log.is_none()
            && self.worker_log.is_none()
            && self.polling_log.is_none()
            && self.polling_interval.is_none()
            && self.polling_throttle.is_none()
    }

    /// The log target requested for `context`, if any.
    pub fn log_for(&self, context: ContextKind) -> Option<&LogTarget> {
        match context {
            ContextKind::Main => self.main_log.as_ref(),
            ContextKind::Worker => self.worker_log.as_ref(),
            ContextKind::Polling => self.polling_log.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Watch sessions
// ---------------------------------------------------------------------------

/// Options for a single watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Use the polling thread instead of native change notifications.
    pub poll: bool,
    /// Descend into subdirectories.
    pub recursive: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll: false,
            recursive: true,
        }
    }
}

impl WatchOptions {
    pub fn polling() -> Self {
        Self {
            poll: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemAction {
    Created,
    Deleted,
    Modified,
    Renamed,
}

impl fmt::Display for FileSystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemAction::Created => write!(f, "created"),
            FileSystemAction::Deleted => write!(f, "deleted"),
            FileSystemAction::Modified => write!(f, "modified"),
            FileSystemAction::Renamed => write!(f, "renamed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    #[default]
    Unknown,
}

/// A single change delivered to a watch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemEvent {
    pub channel: ChannelId,
    pub action: FileSystemAction,
    pub kind: EntryKind,
    pub path: PathBuf,
    /// Previous path for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
}

impl fmt::Display for FileSystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Unknown => "entry",
        };
        match &self.old_path {
            Some(old) => write!(
                f,
                "[{}] {kind} {} {{{} => {}}}",
                self.channel,
                self.action,
                old.display(),
                self.path.display()
            ),
            None => write!(
                f,
                "[{}] {kind} {} {}",
                self.channel,
                self.action,
                self.path.display()
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_indexes_are_dense() {
        let indexes: Vec<usize> = ContextKind::ALL.iter().map(|c| c.index()).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn reserved_target_names_round_trip_through_strings() {
        assert_eq!(LogTarget::from(":stderr"), LogTarget::Stderr);
        assert_eq!(LogTarget::from(":disabled"), LogTarget::Disabled);
        assert_eq!(String::from(LogTarget::Stdout), ":stdout");
        // A file literally named "stderr" stays a file.
        assert_eq!(
            LogTarget::from("stderr"),
            LogTarget::File(PathBuf::from("stderr"))
        );
    }

    #[test]
    fn sentinel_kinds() {
        assert_eq!(LogTarget::from("/tmp/a.log").sink_kind(), "FileLogger");
        assert_eq!(LogTarget::Stderr.sink_kind(), "StderrLogger");
    }

    #[test]
    fn empty_options_report_empty() {
        assert!(ConfigureOptions::new().is_empty());
        assert!(!ConfigureOptions::new().polling_throttle(5).is_empty());
    }

    #[test]
    fn event_display_includes_rename_arrow() {
        let event = FileSystemEvent {
            channel: ChannelId(3),
            action: FileSystemAction::Renamed,
            kind: EntryKind::File,
            path: PathBuf::from("/w/b"),
            old_path: Some(PathBuf::from("/w/a")),
        };
        assert_eq!(event.to_string(), "[3] file renamed {/w/a => /w/b}");
    }
}
