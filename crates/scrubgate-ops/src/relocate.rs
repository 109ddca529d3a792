//! Moving and deleting intake files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use scrubgate_scan::PathGuard;

use crate::OperationError;

/// Highest numeric suffix tried before falling back to a timestamp.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// A free name for `name` inside `dir`.
///
/// For "photo.jpg" tries "photo.jpg", then "photo_1.jpg", "photo_2.jpg", etc.
/// Anything at the path counts as taken, including dangling symlinks.
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !occupied(&first) {
        return first;
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let extension = as_path.extension().and_then(|e| e.to_str());
    let with_suffix = |suffix: &str| match extension {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = dir.join(with_suffix(&i.to_string()));
        if !occupied(&candidate) {
            return candidate;
        }
    }

    // Fallback: use timestamp
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    dir.join(with_suffix(&nanos.to_string()))
}

fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Move `source` into `dest_dir` under a free name, checking both ends with the guard.
///
/// Returns the final destination.
pub fn relocate(guard: &PathGuard, source: &Path, dest_dir: &Path) -> Result<PathBuf, OperationError> {
    let source = guard.check_read(source)?;
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dest = guard.check_write(&unique_destination(dest_dir, &name))?;

    move_file(&source, &dest)?;
    debug!(from = %source.display(), to = %dest.display(), "relocated");
    Ok(dest)
}

/// Delete an intake file after a guard re-check.
pub fn remove(guard: &PathGuard, source: &Path) -> Result<(), OperationError> {
    let source = guard.check_read(source)?;
    fs::remove_file(&source).map_err(|e| OperationError::io("Failed to remove", &source, e))?;
    debug!(path = %source.display(), "removed");
    Ok(())
}

/// Rename, falling back to copy and delete across filesystems.
///
/// Returns the number of bytes moved.
pub(crate) fn move_file(source: &Path, dest: &Path) -> Result<u64, OperationError> {
    let size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);

    // Try rename first (fast path for same filesystem)
    if fs::rename(source, dest).is_ok() {
        return Ok(size);
    }

    fs::copy(source, dest).map_err(|e| OperationError::io("Failed to copy", source, e))?;
    if let Err(e) = fs::remove_file(source) {
        // Leave exactly one copy behind.
        let _ = fs::remove_file(dest);
        return Err(OperationError::io("Failed to remove source", source, e));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf, PathGuard) {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        let input = base.join("input");
        let errors = base.join("errors");
        fs::create_dir(&input).unwrap();
        fs::create_dir(&errors).unwrap();
        let guard = PathGuard::new(&[&input, &errors]).unwrap();
        (temp, input, errors, guard)
    }

    #[test]
    fn test_unique_destination_numbering() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();

        assert_eq!(unique_destination(dir, "a.jpg"), dir.join("a.jpg"));

        fs::write(dir.join("a.jpg"), "1").unwrap();
        assert_eq!(unique_destination(dir, "a.jpg"), dir.join("a_1.jpg"));

        fs::write(dir.join("a_1.jpg"), "2").unwrap();
        assert_eq!(unique_destination(dir, "a.jpg"), dir.join("a_2.jpg"));

        fs::write(dir.join("noext"), "3").unwrap();
        assert_eq!(unique_destination(dir, "noext"), dir.join("noext_1"));
    }

    #[test]
    fn test_relocate_moves_and_renames() {
        let (_temp, input, errors, guard) = setup();
        fs::write(input.join("a.jpg"), "new").unwrap();
        fs::write(errors.join("a.jpg"), "old").unwrap();

        let dest = relocate(&guard, &input.join("a.jpg"), &errors).unwrap();

        assert_eq!(dest, errors.join("a_1.jpg"));
        assert!(!input.join("a.jpg").exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
        assert_eq!(fs::read_to_string(errors.join("a.jpg")).unwrap(), "old");
    }

    #[test]
    fn test_relocate_outside_roots_refused() {
        let (temp, input, _errors, guard) = setup();
        fs::write(input.join("a.jpg"), "x").unwrap();
        let elsewhere = temp.path().canonicalize().unwrap().join("elsewhere");
        fs::create_dir(&elsewhere).unwrap();

        let err = relocate(&guard, &input.join("a.jpg"), &elsewhere).unwrap_err();
        assert!(err.is_unsafe());
        assert!(input.join("a.jpg").exists());
    }

    #[test]
    fn test_remove() {
        let (_temp, input, _errors, guard) = setup();
        fs::write(input.join("a.jpg"), "x").unwrap();

        remove(&guard, &input.join("a.jpg")).unwrap();
        assert!(!input.join("a.jpg").exists());
        assert!(remove(&guard, &input.join("a.jpg")).is_err());
    }

    #[test]
    fn test_move_file_reports_size() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), "12345").unwrap();

        let size = move_file(&temp.path().join("a"), &temp.path().join("b")).unwrap();
        assert_eq!(size, 5);
        assert!(temp.path().join("b").exists());
    }
}
