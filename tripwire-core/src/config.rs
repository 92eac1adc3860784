//! Daemon configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tripwire/
//!   config.yaml   (mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{ConfigureOptions, LogTarget, WatchOptions};

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 100;
pub const DEFAULT_POLLING_THROTTLE: usize = 1000;

/// A watch session the daemon opens at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub poll: bool,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

impl WatchEntry {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            poll: self.poll,
            recursive: self.recursive,
        }
    }
}

fn default_recursive() -> bool {
    true
}

/// Startup defaults for the daemon, applied through the regular `configure`
/// path once the hub is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub main_log: Option<LogTarget>,
    pub worker_log: Option<LogTarget>,
    pub polling_log: Option<LogTarget>,
    pub polling_interval_ms: u64,
    pub polling_throttle: usize,
    pub watches: Vec<WatchEntry>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            main_log: None,
            worker_log: None,
            polling_log: None,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            polling_throttle: DEFAULT_POLLING_THROTTLE,
            watches: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// The option object equivalent to this file. Polling parameters are
    /// always included so the file is authoritative over built-in defaults.
    pub fn configure_options(&self) -> ConfigureOptions {
        ConfigureOptions {
            main_log: self.main_log.clone(),
            worker_log: self.worker_log.clone(),
            polling_log: self.polling_log.clone(),
            polling_interval: Some(self.polling_interval_ms),
            polling_throttle: Some(self.polling_throttle),
        }
    }
}

/// `<home>/.tripwire/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".tripwire").join("config.yaml")
}

/// Load the configuration file. A missing file yields the defaults.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<DaemonConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<DaemonConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the configuration file.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &DaemonConfig) -> Result<(), ConfigError> {
    let path = config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_file_name("config.yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
