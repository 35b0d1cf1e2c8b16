//! fsync helpers for spool state transitions.
//!
//! Claiming a job renames `pending/{job}` to `processing/{job}`. Fanning out
//! hard-links it into another queue's `pending/`. Both only rewrite directory
//! entries, so after a power loss a claimed job can reappear in `pending/`
//! (and be processed twice) unless the directories involved were synced.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs an appended `.index` so a recorded arrival survives a crash.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a state directory such as `{queue}/processing`.
///
/// # Errors
///
/// Fails if the state directory is missing or the fsync call fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir_path)?.sync_all()
}

/// Syncs the state directory holding the job at `path`.
///
/// A bare job name has no directory to sync.
pub fn fsync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fsync_dir(parent),
        _ => Ok(()),
    }
}
