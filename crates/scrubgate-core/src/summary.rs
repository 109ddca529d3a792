//! Per-run outcome counters.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// Prefix of the machine-readable summary line.
pub const SUMMARY_PREFIX: &str = "SCRUBGATE_SUMMARY";

/// Why a considered file was not scrubbed in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Too new or changed since the last run.
    Unstable,
    /// Name looks like an upload in progress.
    Temporary,
    /// Refused by the path safety guard.
    Unsafe,
    /// Name already present in the output directory.
    Duplicate,
    /// Stable, but over the per-run file limit.
    Deferred,
    /// Stable, but the run is a dry run.
    DryRun,
}

/// Counts per skip reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub unstable: u64,
    pub temporary: u64,
    #[serde(rename = "unsafe")]
    pub unsafe_path: u64,
    pub duplicate: u64,
    pub deferred: u64,
    pub dry_run: u64,
}

impl SkipCounts {
    /// Count for one reason.
    pub fn get(&self, reason: SkipReason) -> u64 {
        match reason {
            SkipReason::Unstable => self.unstable,
            SkipReason::Temporary => self.temporary,
            SkipReason::Unsafe => self.unsafe_path,
            SkipReason::Duplicate => self.duplicate,
            SkipReason::Deferred => self.deferred,
            SkipReason::DryRun => self.dry_run,
        }
    }

    fn bump(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Unstable => self.unstable += 1,
            SkipReason::Temporary => self.temporary += 1,
            SkipReason::Unsafe => self.unsafe_path += 1,
            SkipReason::Duplicate => self.duplicate += 1,
            SkipReason::Deferred => self.deferred += 1,
            SkipReason::DryRun => self.dry_run += 1,
        }
    }

    /// Sum over all reasons.
    pub fn total(&self) -> u64 {
        SkipReason::iter().map(|reason| self.get(reason)).sum()
    }
}

/// A file the run could not process, with the underlying error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub message: String,
}

/// What happened to the persisted state at the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateStatus {
    /// Written back to the state file.
    Saved,
    /// Persistence was switched off or found unwritable; nothing written.
    #[default]
    Disabled,
    /// Writing the state file failed.
    SaveFailed,
    /// Dry run; nothing written.
    NotSaved,
}

/// Outcome counters for one intake pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Candidates considered.
    pub total: u64,
    /// Files whose scrubbed copy now exists in the output directory.
    pub scrubbed: u64,
    /// Skips by reason.
    pub skipped: SkipCounts,
    /// Duplicates removed from intake.
    pub duplicates_deleted: u64,
    /// Duplicates moved into quarantine.
    pub duplicates_moved: u64,
    /// Files that failed.
    pub errors: u64,
    /// Failure details, one per error.
    pub failures: Vec<FailureRecord>,
    /// Bytes of scrubbed output written.
    pub bytes_scrubbed: u64,
    /// Non-fatal scan warnings.
    pub scan_warnings: u64,
    /// Persistence outcome.
    pub state: StateStatus,
    /// Wall-clock duration of the run.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl RunSummary {
    /// Create an empty summary for a run starting at `started_at`.
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total: 0,
            scrubbed: 0,
            skipped: SkipCounts::default(),
            duplicates_deleted: 0,
            duplicates_moved: 0,
            errors: 0,
            failures: Vec::new(),
            bytes_scrubbed: 0,
            scan_warnings: 0,
            state: StateStatus::default(),
            duration: Duration::ZERO,
        }
    }

    /// A scrubbed copy of `bytes` bytes was published.
    pub fn record_scrubbed(&mut self, bytes: u64) {
        self.total += 1;
        self.scrubbed += 1;
        self.bytes_scrubbed += bytes;
    }

    /// The file was skipped.
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.total += 1;
        self.skipped.bump(reason);
    }

    /// A duplicate was resolved; `moved` tells whether it went to quarantine.
    pub fn record_duplicate(&mut self, moved: bool) {
        self.record_skip(SkipReason::Duplicate);
        if moved {
            self.duplicates_moved += 1;
        } else {
            self.duplicates_deleted += 1;
        }
    }

    /// The file failed.
    pub fn record_error(&mut self, path: impl Into<PathBuf>, message: impl Into<String>) {
        self.total += 1;
        self.errors += 1;
        self.failures.push(FailureRecord {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Total skipped over all reasons.
    pub fn skipped_total(&self) -> u64 {
        self.skipped.total()
    }

    /// Duplicates resolved either way.
    pub fn duplicates(&self) -> u64 {
        self.duplicates_deleted + self.duplicates_moved
    }

    /// `total == scrubbed + skipped + errors`.
    pub fn is_consistent(&self) -> bool {
        self.total == self.scrubbed + self.skipped_total() + self.errors
    }

    /// Single `key=value` line for automation.
    pub fn machine_line(&self) -> String {
        let mut line = format!(
            "{SUMMARY_PREFIX} total={} scrubbed={} skipped={}",
            self.total,
            self.scrubbed,
            self.skipped_total()
        );
        for reason in SkipReason::iter().filter(|r| *r != SkipReason::Duplicate) {
            let _ = write!(line, " skipped_{reason}={}", self.skipped.get(reason));
        }
        let _ = write!(
            line,
            " duplicates={} duplicates_deleted={} duplicates_moved={} errors={} bytes_scrubbed={} state={} duration={:.3}",
            self.duplicates(),
            self.duplicates_deleted,
            self.duplicates_moved,
            self.errors,
            self.bytes_scrubbed,
            self.state,
            self.duration.as_secs_f64()
        );
        line
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }
}
