//! Directory checks that must pass before any file is touched.

use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use scrubgate_core::{IntakeConfig, IntakeError};

/// Check every configured directory, stopping at the first problem.
pub fn check_directories(config: &IntakeConfig) -> Result<(), IntakeError> {
    for (label, dir) in config.labelled_dirs() {
        check_directory(label, dir)?;
    }
    Ok(())
}

/// `dir` must exist, be a real directory (not a symlink to one) and accept new files.
pub fn check_directory(label: &'static str, dir: &Path) -> Result<(), IntakeError> {
    check_real_directory(label, dir)?;
    NamedTempFile::new_in(dir)
        .map_err(|_| IntakeError::precondition(label, dir, "is not writable"))?;

    debug!(label, path = %dir.display(), "directory ok");
    Ok(())
}

/// The directory holding the run lock must be a real directory.
///
/// Runs before the lock is opened, so nothing is created through a
/// symlinked directory. No write probe is made here.
pub fn check_lock_parent(lock_file: &Path) -> Result<(), IntakeError> {
    match lock_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => check_real_directory("Lock", parent),
        _ => Ok(()),
    }
}

fn check_real_directory(label: &'static str, dir: &Path) -> Result<(), IntakeError> {
    let meta = match std::fs::symlink_metadata(dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IntakeError::precondition(label, dir, "does not exist"));
        }
        Err(e) => return Err(IntakeError::io(dir, e)),
    };
    if meta.file_type().is_symlink() {
        return Err(IntakeError::precondition(
            label,
            dir,
            "is a symbolic link (not allowed)",
        ));
    }
    if !meta.is_dir() {
        return Err(IntakeError::precondition(label, dir, "is not a directory"));
    }
    Ok(())
}
