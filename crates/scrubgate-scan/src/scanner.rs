//! JWalk-based intake directory scanner.

use std::path::{Path, PathBuf};

use jwalk::{DirEntry, Parallelism, WalkDir};
use tracing::{debug, warn};

use scrubgate_core::{CandidateFile, ImageClass, IntakeError, ScanWarning, WarningKind};

use crate::temp_names::TempNameMatcher;

type WalkIter = jwalk::DirEntryIter<((), ())>;

/// Enumerates image candidates in the intake directory.
///
/// Traversal is serial and sorted by name so runs are reproducible. Links are
/// never followed; a symlink is reported as a candidate with `is_symlink` set
/// so the path guard can refuse it.
#[derive(Debug, Clone)]
pub struct CandidateScanner {
    root: PathBuf,
    recursive: bool,
    temp_names: TempNameMatcher,
}

impl CandidateScanner {
    /// Create a scanner for `root`.
    pub fn new(root: impl Into<PathBuf>, recursive: bool, temp_names: TempNameMatcher) -> Self {
        Self {
            root: root.into(),
            recursive,
            temp_names,
        }
    }

    /// The directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a scan.
    ///
    /// Fails up front if the root cannot be listed at all; later per-entry
    /// problems surface as warnings in the returned iterator.
    pub fn scan(&self) -> Result<CandidateIter<'_>, IntakeError> {
        let meta = std::fs::metadata(&self.root).map_err(|e| IntakeError::io(&self.root, e))?;
        if !meta.is_dir() {
            return Err(IntakeError::Scan {
                path: self.root.clone(),
                message: "not a directory".to_string(),
            });
        }
        std::fs::read_dir(&self.root).map_err(|e| IntakeError::io(&self.root, e))?;

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&self.root)
            .parallelism(Parallelism::Serial)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(1)
            .max_depth(max_depth);

        Ok(CandidateIter {
            scanner: self,
            walker: walker.into_iter(),
            finished: false,
        })
    }

    /// Build a candidate from a walked entry, `None` when it is not an image file.
    fn candidate(&self, entry: &DirEntry<((), ())>) -> Option<Result<CandidateFile, ScanWarning>> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }
        if !file_type.is_file() && !file_type.is_symlink() {
            return None;
        }

        let name = entry.file_name().to_string_lossy();
        let looks_temporary = self.temp_names.is_temporary(&name);
        let class = ImageClass::from_name(&name, looks_temporary)?;

        let path = entry.path();
        // lstat: the link itself, never its target.
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(err) => return Some(Err(ScanWarning::metadata(&path, &err))),
        };
        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(err) => return Some(Err(ScanWarning::metadata(&path, &err))),
        };

        Some(Ok(CandidateFile {
            name: name.as_ref().into(),
            path,
            size: metadata.len(),
            modified,
            class,
            looks_temporary,
            is_symlink: metadata.file_type().is_symlink(),
        }))
    }
}

/// Lazy sequence of candidates from one scan.
///
/// A failure to read the root itself yields a single [`WarningKind::Aborted`]
/// warning and ends the sequence.
pub struct CandidateIter<'a> {
    scanner: &'a CandidateScanner,
    walker: WalkIter,
    finished: bool,
}

impl Iterator for CandidateIter<'_> {
    type Item = Result<CandidateFile, ScanWarning>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| self.scanner.root.clone());
                    if path == self.scanner.root {
                        self.finished = true;
                        warn!(path = %path.display(), error = %err, "scan aborted");
                        return Some(Err(ScanWarning::new(
                            path,
                            err.to_string(),
                            WarningKind::Aborted,
                        )));
                    }
                    let kind = match err.io_error().map(|e| e.kind()) {
                        Some(std::io::ErrorKind::PermissionDenied) => WarningKind::PermissionDenied,
                        _ => WarningKind::ReadError,
                    };
                    warn!(path = %path.display(), error = %err, "scan warning");
                    return Some(Err(ScanWarning::new(path, err.to_string(), kind)));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            match self.scanner.candidate(&entry) {
                Some(item) => return Some(item),
                None => {
                    debug!(path = %entry.path().display(), "not a candidate");
                }
            }
        }
    }
}
