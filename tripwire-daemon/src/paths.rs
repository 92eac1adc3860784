//! Locations under `~/.tripwire/`.

use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "tripwire.sock";

pub fn tripwire_root(home: &Path) -> PathBuf {
    home.join(".tripwire")
}

pub fn socket_path(home: &Path) -> PathBuf {
    tripwire_root(home).join(DAEMON_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    tripwire_core::config::config_path_at(home)
}

/// Conventional directory for file log targets.
pub fn logs_dir(home: &Path) -> PathBuf {
    tripwire_root(home).join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_lives_under_the_root() {
        let home = Path::new("/home/me");
        let root = tripwire_root(home);
        assert!(socket_path(home).starts_with(&root));
        assert!(config_path(home).starts_with(&root));
        assert!(logs_dir(home).starts_with(&root));
    }
}
