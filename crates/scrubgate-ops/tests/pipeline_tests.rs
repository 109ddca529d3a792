use scrubgate_core::{DuplicatePolicy, IntakeConfig, IntakeConfigBuilder, StateLocation};
use scrubgate_ops::{
    EngineOutput, IntakeError, OperationError, RunLock, RunOutcome, RunSummary, Runner,
    ScrubEngine, StateStatus,
};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Copies the source unless its contents start with "CORRUPT".
#[derive(Debug, Default)]
struct FakeEngine {
    calls: Cell<usize>,
}

impl ScrubEngine for FakeEngine {
    async fn scrub(&self, source: &Path, destination: &Path) -> Result<EngineOutput, OperationError> {
        self.calls.set(self.calls.get() + 1);
        let bytes = fs::read(source).unwrap();
        if bytes.starts_with(b"CORRUPT") {
            fs::write(destination, b"half-written").unwrap();
            return Ok(EngineOutput::failure(1, "Error: Not a valid JPG"));
        }
        fs::write(destination, [b"SCRUBBED:".as_slice(), &bytes[..]].concat()).unwrap();
        Ok(EngineOutput::success())
    }
}

struct Fixture {
    _temp: TempDir,
    base: PathBuf,
    input: PathBuf,
    output: PathBuf,
    processed: PathBuf,
    errors: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        let fixture = Self {
            input: base.join("input"),
            output: base.join("output"),
            processed: base.join("processed"),
            errors: base.join("errors"),
            base,
            _temp: temp,
        };
        for dir in [&fixture.input, &fixture.output, &fixture.processed, &fixture.errors] {
            fs::create_dir(dir).unwrap();
        }
        fixture
    }

    fn builder(&self) -> IntakeConfigBuilder {
        let mut builder = IntakeConfig::builder();
        builder
            .input_dir(&self.input)
            .output_dir(&self.output)
            .processed_dir(&self.processed)
            .errors_dir(&self.errors);
        builder
    }

    fn runner(&self, builder: &IntakeConfigBuilder) -> Runner<FakeEngine> {
        Runner::with_engine(builder.build().unwrap(), FakeEngine::default())
    }

    fn state_file(&self) -> PathBuf {
        self.processed.join(".scrubgate_state.json")
    }
}

/// Names in `dir`, ignoring scrubgate's own bookkeeping files.
fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != ".scrubgate_state.json" && name != ".scrubgate.lock")
        .collect();
    names.sort();
    names
}

fn summary(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Completed(report) => {
            assert!(report.error.is_none(), "unexpected scan error: {:?}", report.error);
            assert!(report.summary.is_consistent());
            report.summary
        }
        RunOutcome::LockHeld => panic!("lock unexpectedly held"),
    }
}

fn much_later() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

#[tokio::test]
async fn test_new_file_waits_for_window_then_scrubs() {
    let fx = Fixture::new();
    fs::write(fx.input.join("IMG_0001.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(120u64));

    let t0 = SystemTime::now();
    let first = summary(runner.run_at(t0).await.unwrap());
    assert_eq!(first.total, 1);
    assert_eq!(first.skipped.unstable, 1);
    assert_eq!(first.state, StateStatus::Saved);
    assert!(entries(&fx.output).is_empty());
    assert!(fs::read_to_string(fx.state_file()).unwrap().contains("IMG_0001.jpg"));

    let second = summary(runner.run_at(t0 + Duration::from_secs(130)).await.unwrap());
    assert_eq!(second.scrubbed, 1);
    assert_eq!(second.bytes_scrubbed, "SCRUBBED:pixels".len() as u64);
    assert_eq!(entries(&fx.output), ["IMG_0001.jpg"]);
    assert_eq!(entries(&fx.processed), ["IMG_0001.jpg"]);
    assert!(entries(&fx.input).is_empty());
    assert!(!fs::read_to_string(fx.state_file()).unwrap().contains("IMG_0001.jpg"));
}

#[tokio::test]
async fn test_duplicate_deleted_without_scrubbing() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "second upload").unwrap();
    fs::write(fx.output.join("a.jpg"), "already published").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.skipped.duplicate, 1);
    assert_eq!(result.duplicates_deleted, 1);
    assert_eq!(result.errors, 0);
    assert!(entries(&fx.input).is_empty());
    assert_eq!(
        fs::read_to_string(fx.output.join("a.jpg")).unwrap(),
        "already published"
    );
}

#[tokio::test]
async fn test_duplicate_quarantined_with_unique_name() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "second upload").unwrap();
    fs::write(fx.output.join("a.jpg"), "already published").unwrap();
    fs::write(fx.errors.join("a.jpg"), "earlier duplicate").unwrap();
    let runner = fx.runner(
        fx.builder()
            .stable_seconds(0u64)
            .on_duplicate(DuplicatePolicy::Quarantine),
    );

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.duplicates_moved, 1);
    assert!(entries(&fx.input).is_empty());
    assert_eq!(entries(&fx.errors), ["a.jpg", "a_1.jpg"]);
    assert_eq!(
        fs::read_to_string(fx.errors.join("a_1.jpg")).unwrap(),
        "second upload"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_to_outside_root_untouched() {
    let fx = Fixture::new();
    let secret = fx.base.join("secret.jpg");
    fs::write(&secret, "private").unwrap();
    std::os::unix::fs::symlink(&secret, fx.input.join("evil.jpg")).unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.skipped.unsafe_path, 1);
    assert_eq!(result.errors, 0);
    assert!(fs::symlink_metadata(fx.input.join("evil.jpg")).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_to_string(&secret).unwrap(), "private");
    assert!(entries(&fx.output).is_empty());
    assert!(entries(&fx.processed).is_empty());
}

#[tokio::test]
async fn test_engine_failure_moves_original_and_leaves_no_output() {
    let fx = Fixture::new();
    fs::write(fx.input.join("bad.jpg"), "CORRUPT bytes").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.errors, 1);
    assert_eq!(result.scrubbed, 0);
    assert_eq!(result.failures[0].path, fx.input.join("bad.jpg"));
    assert!(result.failures[0].message.contains("Not a valid JPG"));
    assert!(entries(&fx.output).is_empty());
    assert_eq!(entries(&fx.processed), ["bad.jpg"]);
    assert!(entries(&fx.input).is_empty());

    // Never retried.
    let again = summary(runner.run_at(much_later()).await.unwrap());
    assert_eq!(again.total, 0);
}

#[tokio::test]
async fn test_unwritable_state_location_degrades() {
    let fx = Fixture::new();
    let blocker = fx.base.join("blocker");
    fs::write(&blocker, "a file, not a directory").unwrap();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(
        fx.builder()
            .stable_seconds(0u64)
            .state(Some(StateLocation::Path(blocker.join("state.json")))),
    );

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.state, StateStatus::Disabled);
    assert_eq!(result.scrubbed, 1);
    assert!(blocker.is_file());
}

#[tokio::test]
async fn test_disabled_state_writes_nothing() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(
        fx.builder()
            .stable_seconds(120u64)
            .state(Some(StateLocation::Disabled)),
    );

    let result = summary(runner.run_at(SystemTime::now()).await.unwrap());

    assert_eq!(result.skipped.unstable, 1);
    assert_eq!(result.state, StateStatus::Disabled);
    assert!(!fx.state_file().exists());
}

#[tokio::test]
async fn test_temporary_names_recorded_but_never_scrubbed() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg.part"), "half").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.skipped.temporary, 1);
    assert_eq!(entries(&fx.input), ["a.jpg.part"]);
    assert!(fs::read_to_string(fx.state_file()).unwrap().contains("a.jpg.part"));
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64).dry_run(true));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.skipped.dry_run, 1);
    assert_eq!(result.state, StateStatus::NotSaved);
    assert_eq!(entries(&fx.input), ["a.jpg"]);
    assert!(entries(&fx.output).is_empty());
    assert!(!fx.state_file().exists());
}

#[tokio::test]
async fn test_max_files_defers_the_rest() {
    let fx = Fixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        fs::write(fx.input.join(name), name).unwrap();
    }
    let runner = fx.runner(fx.builder().stable_seconds(0u64).max_files(Some(1usize)));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.scrubbed, 1);
    assert_eq!(result.skipped.deferred, 2);
    assert_eq!(entries(&fx.output), ["a.jpg"]);
    assert_eq!(entries(&fx.input), ["b.jpg", "c.jpg"]);
}

#[tokio::test]
async fn test_delete_original_after_success() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64).delete_original(true));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.scrubbed, 1);
    assert!(entries(&fx.processed).is_empty());
    assert!(entries(&fx.input).is_empty());
}

#[tokio::test]
async fn test_stale_records_are_collected() {
    let fx = Fixture::new();
    fs::write(
        fx.state_file(),
        r#"{"/gone/elsewhere.jpg": {"size": 1, "mtime": 1.0, "first_seen": 1.0}}"#,
    )
    .unwrap();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(120u64));

    summary(runner.run_at(SystemTime::now()).await.unwrap());

    let state = fs::read_to_string(fx.state_file()).unwrap();
    assert!(!state.contains("/gone/elsewhere.jpg"));
    assert!(state.contains("a.jpg"));
}

#[tokio::test]
async fn test_corrupt_state_file_is_replaced() {
    let fx = Fixture::new();
    fs::write(fx.state_file(), "{ this is not json").unwrap();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(120u64));

    let result = summary(runner.run_at(SystemTime::now()).await.unwrap());

    assert_eq!(result.state, StateStatus::Saved);
    let state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fx.state_file()).unwrap()).unwrap();
    assert!(state.as_object().unwrap().len() == 1);
}

#[tokio::test]
async fn test_lock_held_touches_nothing() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let config = fx.builder().stable_seconds(0u64).build().unwrap();
    let _held = RunLock::try_acquire(&config.lock_file()).unwrap().unwrap();

    let runner = Runner::with_engine(config, FakeEngine::default());
    let outcome = runner.run_at(much_later()).await.unwrap();

    assert!(matches!(outcome, RunOutcome::LockHeld));
    assert_eq!(entries(&fx.input), ["a.jpg"]);
    assert!(!fx.state_file().exists());
}

#[tokio::test]
async fn test_missing_directory_aborts_before_any_change() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    fs::remove_dir(&fx.processed).unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let err = runner.run_at(much_later()).await.unwrap_err();

    assert!(matches!(err, IntakeError::Precondition { label: "Processed", .. }));
    assert_eq!(entries(&fx.input), ["a.jpg"]);
    assert!(entries(&fx.output).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_errors_dir_aborts_before_lock_is_created() {
    let fx = Fixture::new();
    fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
    let outside = fx.base.join("outside");
    fs::create_dir(&outside).unwrap();
    fs::remove_dir(&fx.errors).unwrap();
    std::os::unix::fs::symlink(&outside, &fx.errors).unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let err = runner.run_at(much_later()).await.unwrap_err();

    assert!(matches!(err, IntakeError::Precondition { .. }));
    assert_eq!(fs::read_dir(&outside).unwrap().count(), 0);
    assert_eq!(entries(&fx.input), ["a.jpg"]);
    assert!(entries(&fx.output).is_empty());
}

#[tokio::test]
async fn test_staging_left_by_interrupted_run_is_swept() {
    let fx = Fixture::new();
    let stale = fx.output.join(".scrubgate-Xk3pQ9");
    fs::create_dir(&stale).unwrap();
    fs::write(stale.join("IMG_0001.jpg"), "half-written").unwrap();
    fs::write(fx.input.join("IMG_0002.jpg"), "pixels").unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64));

    let result = summary(runner.run_at(much_later()).await.unwrap());

    assert_eq!(result.scrubbed, 1);
    assert!(!stale.exists());
    assert_eq!(entries(&fx.output), ["IMG_0002.jpg"]);
}

#[tokio::test]
async fn test_dry_run_leaves_stale_staging_alone() {
    let fx = Fixture::new();
    let stale = fx.output.join(".scrubgate-Xk3pQ9");
    fs::create_dir(&stale).unwrap();
    let runner = fx.runner(fx.builder().stable_seconds(0u64).dry_run(true));

    summary(runner.run_at(much_later()).await.unwrap());

    assert!(stale.exists());
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use scrubgate_core::EngineConfig;

    const COPY_SCRIPT: &str = r#"
dest=""
prev=""
src=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then dest="$arg"; fi
  prev="$arg"
  src="$arg"
done
cp "$src" "$dest"
"#;

    const FAIL_SCRIPT: &str = r#"
echo "Error: File format error - $1" >&2
exit 1
"#;

    fn shell_engine(fx: &Fixture, script: &str) -> EngineConfig {
        let path = fx.base.join("fake-exiftool.sh");
        fs::write(&path, script).unwrap();
        EngineConfig::default()
            .with_program("/bin/sh")
            .with_program_args(vec![path.to_string_lossy().into_owned()])
    }

    #[tokio::test]
    async fn test_subprocess_engine_publishes_output() {
        let fx = Fixture::new();
        fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
        let config = fx
            .builder()
            .stable_seconds(0u64)
            .engine(shell_engine(&fx, COPY_SCRIPT))
            .build()
            .unwrap();

        let result = summary(Runner::new(config).run_at(much_later()).await.unwrap());

        assert_eq!(result.scrubbed, 1);
        assert_eq!(fs::read_to_string(fx.output.join("a.jpg")).unwrap(), "pixels");
        assert_eq!(entries(&fx.output), ["a.jpg"]);
    }

    #[tokio::test]
    async fn test_subprocess_engine_failure_recorded() {
        let fx = Fixture::new();
        fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
        let config = fx
            .builder()
            .stable_seconds(0u64)
            .engine(shell_engine(&fx, FAIL_SCRIPT))
            .build()
            .unwrap();

        let result = summary(Runner::new(config).run_at(much_later()).await.unwrap());

        assert_eq!(result.errors, 1);
        assert!(result.failures[0].message.contains("File format error"));
        assert!(entries(&fx.output).is_empty());
        assert_eq!(entries(&fx.processed), ["a.jpg"]);
    }

    #[tokio::test]
    async fn test_subprocess_engine_timeout() {
        let fx = Fixture::new();
        fs::write(fx.input.join("a.jpg"), "pixels").unwrap();
        let config = fx
            .builder()
            .stable_seconds(0u64)
            .engine(shell_engine(&fx, "sleep 30\n").with_timeout(1))
            .build()
            .unwrap();

        let result = summary(Runner::new(config).run_at(much_later()).await.unwrap());

        assert_eq!(result.errors, 1);
        assert!(result.failures[0].message.contains("timed out"));
        assert!(entries(&fx.output).is_empty());
    }
}
