//! Running the engine for one file and publishing its output.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{error, info, warn};

use scrubgate_scan::PathGuard;

use crate::engine::ScrubEngine;
use crate::operation::first_line;
use crate::relocate::{move_file, relocate, remove};
use crate::OperationError;

/// Prefix of the private staging directories created inside the output directory.
pub const STAGING_PREFIX: &str = ".scrubgate-";

/// Where the original ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalFate {
    /// Moved into the processed directory at this path.
    Processed(PathBuf),
    /// Deleted after a successful scrub.
    Deleted,
    /// Still in intake because routing it failed.
    Retained,
}

/// A published scrubbed copy.
#[derive(Debug, Clone)]
pub struct ScrubReport {
    /// Path of the published output.
    pub output: PathBuf,
    /// Size of the published output.
    pub bytes: u64,
    /// What happened to the original.
    pub original: OriginalFate,
}

/// A file that could not be scrubbed.
#[derive(Debug)]
pub struct ScrubFailure {
    /// Why it failed.
    pub error: OperationError,
    /// What happened to the original.
    pub original: OriginalFate,
}

impl ScrubFailure {
    /// Whether the failure was a path safety refusal (nothing was touched).
    pub fn is_unsafe(&self) -> bool {
        self.error.is_unsafe()
    }
}

/// Applies the engine to intake files with an at-most-one-output-write guarantee.
///
/// The engine only ever writes into a fresh staging directory. The staged
/// file is renamed into the output directory once, and only when the engine
/// exited cleanly and the file is really there.
#[derive(Debug, Clone)]
pub struct Scrubber<E> {
    engine: E,
    output_dir: PathBuf,
    processed_dir: PathBuf,
    delete_original: bool,
}

impl<E: ScrubEngine> Scrubber<E> {
    /// Create a scrubber publishing into `output_dir` and retiring originals into `processed_dir`.
    pub fn new(engine: E, output_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            output_dir: output_dir.into(),
            processed_dir: processed_dir.into(),
            delete_original: false,
        }
    }

    /// Delete originals after a successful scrub instead of moving them.
    pub fn delete_original(mut self, delete: bool) -> Self {
        self.delete_original = delete;
        self
    }

    /// The engine in use.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Scrub `source` into the output directory.
    pub async fn scrub(&self, guard: &PathGuard, source: &Path) -> Result<ScrubReport, ScrubFailure> {
        let unsafe_failure = |error: OperationError| ScrubFailure {
            error,
            original: OriginalFate::Retained,
        };

        let source = guard.check_read(source).map_err(|e| unsafe_failure(e.into()))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination = guard
            .check_write(&self.output_dir.join(&name))
            .map_err(|e| unsafe_failure(e.into()))?;

        match self.produce(guard, &source, &name, &destination).await {
            Ok(bytes) => {
                info!(
                    path = %source.display(),
                    output = %destination.display(),
                    bytes,
                    "scrubbed"
                );
                let original = self.retire_original(guard, &source);
                Ok(ScrubReport {
                    output: destination,
                    bytes,
                    original,
                })
            }
            Err(error) if error.is_unsafe() => {
                warn!(path = %source.display(), error = %error, "refused during publish; original left in place");
                Err(unsafe_failure(error))
            }
            Err(error) => {
                let original = match relocate(guard, &source, &self.processed_dir) {
                    Ok(moved) => {
                        warn!(
                            path = %source.display(),
                            to = %moved.display(),
                            error = %error,
                            "Scrub failed for {}; moved original",
                            source.display()
                        );
                        OriginalFate::Processed(moved)
                    }
                    Err(move_err) => {
                        error!(
                            path = %source.display(),
                            error = %error,
                            move_error = %move_err,
                            "Scrub failed and original could not be moved"
                        );
                        OriginalFate::Retained
                    }
                };
                Err(ScrubFailure { error, original })
            }
        }
    }

    /// Run the engine into staging and publish. Returns the published size.
    async fn produce(
        &self,
        guard: &PathGuard,
        source: &Path,
        name: &str,
        destination: &Path,
    ) -> Result<u64, OperationError> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.output_dir)
            .map_err(|e| OperationError::io("Failed to create staging directory in", &self.output_dir, e))?;
        let staged = staging.path().join(name);

        let output = self.engine.scrub(source, &staged).await?;
        if !output.is_success() {
            return Err(OperationError::EngineFailed {
                path: source.to_path_buf(),
                status: output.status(),
                diagnostic: first_line(&output.stderr),
            });
        }
        let staged_is_file = fs::symlink_metadata(&staged)
            .map(|m| m.file_type().is_file())
            .unwrap_or(false);
        if !staged_is_file {
            return Err(OperationError::MissingOutput {
                path: source.to_path_buf(),
            });
        }

        publish(guard, staging, &staged, destination)
    }

    fn retire_original(&self, guard: &PathGuard, source: &Path) -> OriginalFate {
        let result = if self.delete_original {
            remove(guard, source).map(|()| OriginalFate::Deleted)
        } else {
            relocate(guard, source, &self.processed_dir).map(OriginalFate::Processed)
        };
        result.unwrap_or_else(|e| {
            error!(path = %source.display(), error = %e, "scrubbed, but original could not be retired");
            OriginalFate::Retained
        })
    }
}

/// Remove staging directories left in `output_dir` by an interrupted run.
///
/// Only call this while holding the run lock; a live run's staging directory
/// looks the same. Returns how many were removed.
pub fn sweep_staging(output_dir: &Path) -> usize {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %output_dir.display(), error = %e, "could not list output for stale staging");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        // file_type() does not follow links, so a symlink is never descended into.
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed stale staging directory");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "stale staging directory not removed"),
        }
    }
    removed
}

/// Move the staged file onto `destination`, never replacing an existing entry.
fn publish(guard: &PathGuard, staging: TempDir, staged: &Path, destination: &Path) -> Result<u64, OperationError> {
    let destination = guard.check_write(destination)?;
    if fs::symlink_metadata(&destination).is_ok() {
        return Err(OperationError::DestinationExists { path: destination });
    }
    let bytes = move_file(staged, &destination)?;
    if let Err(e) = staging.close() {
        warn!(path = %staged.display(), error = %e, "staging directory left behind");
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOutput;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Copy,
        FailAfterPartialWrite,
        SucceedWithoutOutput,
    }

    #[derive(Debug)]
    struct FakeEngine {
        behavior: Behavior,
        calls: Cell<usize>,
    }

    impl FakeEngine {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: Cell::new(0),
            }
        }
    }

    impl ScrubEngine for FakeEngine {
        async fn scrub(&self, source: &Path, destination: &Path) -> Result<EngineOutput, OperationError> {
            self.calls.set(self.calls.get() + 1);
            match self.behavior {
                Behavior::Copy => {
                    fs::copy(source, destination).unwrap();
                    Ok(EngineOutput::success())
                }
                Behavior::FailAfterPartialWrite => {
                    fs::write(destination, b"partial").unwrap();
                    Ok(EngineOutput::failure(1, "Error: Not a valid JPG\nsecond line"))
                }
                Behavior::SucceedWithoutOutput => Ok(EngineOutput::success()),
            }
        }
    }

    struct Dirs {
        _temp: TempDir,
        input: PathBuf,
        output: PathBuf,
        processed: PathBuf,
        guard: PathGuard,
    }

    fn dirs() -> Dirs {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        let input = base.join("input");
        let output = base.join("output");
        let processed = base.join("processed");
        for dir in [&input, &output, &processed] {
            fs::create_dir(dir).unwrap();
        }
        let guard = PathGuard::new(&[&input, &output, &processed]).unwrap();
        Dirs {
            _temp: temp,
            input,
            output,
            processed,
            guard,
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_success_publishes_and_moves_original() {
        let d = dirs();
        fs::write(d.input.join("a.jpg"), "image-bytes").unwrap();
        let scrubber = Scrubber::new(FakeEngine::new(Behavior::Copy), &d.output, &d.processed);

        let report = scrubber.scrub(&d.guard, &d.input.join("a.jpg")).await.unwrap();

        assert_eq!(report.output, d.output.join("a.jpg"));
        assert_eq!(report.bytes, 11);
        assert_eq!(report.original, OriginalFate::Processed(d.processed.join("a.jpg")));
        assert_eq!(entries(&d.output), ["a.jpg"]);
        assert!(entries(&d.input).is_empty());
    }

    #[tokio::test]
    async fn test_success_with_delete_original() {
        let d = dirs();
        fs::write(d.input.join("a.jpg"), "image-bytes").unwrap();
        let scrubber = Scrubber::new(FakeEngine::new(Behavior::Copy), &d.output, &d.processed)
            .delete_original(true);

        let report = scrubber.scrub(&d.guard, &d.input.join("a.jpg")).await.unwrap();

        assert_eq!(report.original, OriginalFate::Deleted);
        assert!(entries(&d.input).is_empty());
        assert!(entries(&d.processed).is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_no_output() {
        let d = dirs();
        fs::write(d.input.join("bad.jpg"), "corrupt").unwrap();
        let scrubber = Scrubber::new(
            FakeEngine::new(Behavior::FailAfterPartialWrite),
            &d.output,
            &d.processed,
        );

        let failure = scrubber.scrub(&d.guard, &d.input.join("bad.jpg")).await.unwrap_err();

        assert!(matches!(failure.error, OperationError::EngineFailed { .. }));
        assert!(failure.error.to_string().ends_with("Error: Not a valid JPG"));
        assert_eq!(failure.original, OriginalFate::Processed(d.processed.join("bad.jpg")));
        assert!(entries(&d.output).is_empty(), "staging must be cleaned up");
        assert!(entries(&d.input).is_empty());
    }

    #[tokio::test]
    async fn test_success_without_output_is_failure() {
        let d = dirs();
        fs::write(d.input.join("a.jpg"), "x").unwrap();
        let scrubber = Scrubber::new(
            FakeEngine::new(Behavior::SucceedWithoutOutput),
            &d.output,
            &d.processed,
        );

        let failure = scrubber.scrub(&d.guard, &d.input.join("a.jpg")).await.unwrap_err();

        assert!(matches!(failure.error, OperationError::MissingOutput { .. }));
        assert!(entries(&d.output).is_empty());
        assert_eq!(entries(&d.processed), ["a.jpg"]);
    }

    #[tokio::test]
    async fn test_existing_output_never_replaced() {
        let d = dirs();
        fs::write(d.input.join("a.jpg"), "new").unwrap();
        fs::write(d.output.join("a.jpg"), "published").unwrap();
        let scrubber = Scrubber::new(FakeEngine::new(Behavior::Copy), &d.output, &d.processed);

        let failure = scrubber.scrub(&d.guard, &d.input.join("a.jpg")).await.unwrap_err();

        assert!(matches!(failure.error, OperationError::DestinationExists { .. }));
        assert_eq!(fs::read_to_string(d.output.join("a.jpg")).unwrap(), "published");
        assert_eq!(entries(&d.output), ["a.jpg"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_source_never_reaches_engine() {
        let d = dirs();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.jpg"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.jpg"), d.input.join("evil.jpg"))
            .unwrap();
        let engine = FakeEngine::new(Behavior::Copy);
        let scrubber = Scrubber::new(engine, &d.output, &d.processed);

        let failure = scrubber.scrub(&d.guard, &d.input.join("evil.jpg")).await.unwrap_err();

        assert!(failure.is_unsafe());
        assert_eq!(failure.original, OriginalFate::Retained);
        assert_eq!(scrubber.engine().calls.get(), 0);
        assert!(entries(&d.output).is_empty());
        assert!(fs::symlink_metadata(d.input.join("evil.jpg")).is_ok());
    }

    #[test]
    fn test_sweep_removes_only_stale_staging() {
        let d = dirs();
        let stale = d.output.join(format!("{STAGING_PREFIX}a1b2c3"));
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join("IMG_0001.jpg"), b"half").unwrap();
        fs::write(d.output.join("published.jpg"), b"done").unwrap();
        fs::write(d.output.join(format!("{STAGING_PREFIX}not-a-dir")), b"x").unwrap();

        assert_eq!(sweep_staging(&d.output), 1);
        assert_eq!(
            entries(&d.output),
            [format!("{STAGING_PREFIX}not-a-dir"), "published.jpg".to_string()]
        );
        assert_eq!(sweep_staging(&d.output), 0);
    }
}
