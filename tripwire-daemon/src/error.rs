use std::path::PathBuf;

use thiserror::Error;
use tripwire_core::{ChannelId, ContextKind, LogTarget};

/// Error surface for the hub, its threads, and the daemon socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] tripwire_core::ConfigError),

    #[error("configure error: {0}")]
    Configure(#[from] ConfigureError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no watch session with channel {0}")]
    UnknownChannel(ChannelId),

    #[error("invalid watch request: {0}")]
    InvalidWatch(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

/// Failures of a `configure` call, or of one of its keys.
#[derive(Debug, Error)]
pub enum ConfigureError {
    /// Malformed or missing option object. Raised before any sink is touched.
    #[error("{0}")]
    Argument(String),

    /// The new sink for `context` could not be opened. The previous sink is
    /// still active.
    #[error("failed to open {context} log {target}: {source}")]
    Open {
        context: ContextKind,
        target: LogTarget,
        #[source]
        source: std::io::Error,
    },

    /// The registry could not publish the new sink.
    #[error("failed to swap {context} log: {reason}")]
    InternalSwap {
        context: ContextKind,
        reason: String,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl ConfigureError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        ConfigureError::Argument(message.into())
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
