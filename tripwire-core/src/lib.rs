//! tripwire core library: domain types and the daemon configuration file.
//!
//! - [`types`]: contexts, log targets, configure options, watch events
//! - [`config`]: `~/.tripwire/config.yaml` load / save
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{DaemonConfig, WatchEntry};
pub use error::ConfigError;
pub use types::{
    ChannelId, ConfigureOptions, ContextKind, EntryKind, FileSystemAction, FileSystemEvent,
    LogTarget, WatchOptions,
};
