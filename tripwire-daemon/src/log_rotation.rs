//! Size-based rotation for file sinks.
//!
//! A file target is rotated right before a sink opens on it. The registry
//! skips rotation for a path some context is still writing to. Copies are
//! numbered `<name>.1` (newest) up to `<name>.<max_files>` (oldest); the
//! oldest copy is dropped on overflow.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated copies to keep.
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl RotationPolicy {
    /// Never rotate.
    pub fn disabled() -> Self {
        Self {
            max_bytes: u64::MAX,
            max_files: 0,
        }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            max_files: MAX_ROTATED_FILES,
        }
    }
}

/// Move `target` aside if it has grown past `policy.max_bytes`.
///
/// Returns the path the old contents now live at, or `None` when the file is
/// missing or under the threshold. The caller creates the fresh file.
pub fn rotate_before_open(target: &Path, policy: RotationPolicy) -> io::Result<Option<PathBuf>> {
    let size = match fs::metadata(target) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.max_files == 0 {
        return Ok(None);
    }

    match fs::remove_file(numbered_path(target, policy.max_files)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    for n in (1..policy.max_files).rev() {
        let src = numbered_path(target, n);
        if src.exists() {
            fs::rename(&src, numbered_path(target, n + 1))?;
        }
    }

    let first = numbered_path(target, 1);
    fs::rename(target, &first)?;
    Ok(Some(first))
}

/// `<dir>/<name>.<n>` for a log file `<dir>/<name>`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tripwire.log".to_string());
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_policy() -> RotationPolicy {
        RotationPolicy {
            max_bytes: 16,
            max_files: 3,
        }
    }

    #[test]
    fn under_threshold_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("worker.log");
        fs::write(&log, b"short").unwrap();

        let rotated = rotate_before_open(&log, small_policy()).unwrap();
        assert!(rotated.is_none());
        assert_eq!(fs::read(&log).unwrap(), b"short");
    }

    #[test]
    fn missing_target_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let rotated = rotate_before_open(&dir.path().join("absent.log"), small_policy()).unwrap();
        assert!(rotated.is_none());
    }

    #[test]
    fn oversized_target_moves_to_first_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("polling.log");
        fs::write(&log, vec![b'x'; 32]).unwrap();

        let rotated = rotate_before_open(&log, small_policy()).unwrap();
        assert_eq!(rotated, Some(numbered_path(&log, 1)));
        assert!(!log.exists(), "the sink creates the fresh file, not rotation");
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), 32);
    }

    #[test]
    fn copies_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("main.log");

        for round in 1..=4u8 {
            fs::write(&log, vec![b'0' + round; 32]).unwrap();
            rotate_before_open(&log, small_policy()).unwrap();
        }

        // Round 4 is newest in .1, round 2 oldest kept in .3, round 1 gone.
        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap()[0], b'4');
        assert_eq!(fs::read(numbered_path(&log, 3)).unwrap()[0], b'2');
        assert!(!numbered_path(&log, 4).exists());
    }
}
