//! Filesystem helpers for generation directories.

use std::fs;
use std::path::Path;

use log::warn;

/// Total size in bytes of the regular files under `path`.
/// Unreadable entries are skipped.
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("cannot stat {}: {e}", entry.path().display());
                0
            }
        })
        .sum()
}
