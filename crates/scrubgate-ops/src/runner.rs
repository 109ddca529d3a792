//! One bounded intake pass.

use std::collections::HashSet;
use std::time::{Instant, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use scrubgate_core::{IntakeConfig, IntakeError, RunSummary, SkipReason, StateStatus, WarningKind};
use scrubgate_scan::{CandidateFile, CandidateScanner, PathGuard, TempNameMatcher};
use scrubgate_state::{StabilityDecision, StabilityGate, StateMap, StateStore, retain_seen};

use crate::duplicate::DuplicateResolver;
use crate::engine::{ExiftoolEngine, ScrubEngine};
use crate::lock::RunLock;
use crate::preflight;
use crate::scrub::{OriginalFate, Scrubber, sweep_staging};

/// Result of a pass that got past the lock and preflight.
#[derive(Debug)]
pub struct RunReport {
    /// Outcome counters.
    pub summary: RunSummary,
    /// Set when the scan stopped part-way; the summary covers what was seen.
    pub error: Option<IntakeError>,
}

/// What an invocation did.
#[derive(Debug)]
pub enum RunOutcome {
    /// The pass ran.
    Completed(RunReport),
    /// Another run holds the lock; nothing was touched.
    LockHeld,
}

/// Runs the intake pipeline: scan, guard, stability, duplicates, scrub.
#[derive(Debug)]
pub struct Runner<E> {
    config: IntakeConfig,
    scrubber: Scrubber<E>,
    duplicates: DuplicateResolver,
}

impl Runner<ExiftoolEngine> {
    /// Runner using the engine described by `config.engine`.
    pub fn new(config: IntakeConfig) -> Self {
        let engine = ExiftoolEngine::new(config.engine.clone());
        Self::with_engine(config, engine)
    }
}

impl<E: ScrubEngine> Runner<E> {
    /// Runner using a custom engine.
    pub fn with_engine(config: IntakeConfig, engine: E) -> Self {
        let scrubber = Scrubber::new(engine, &config.output_dir, &config.processed_dir)
            .delete_original(config.delete_original);
        let duplicates =
            DuplicateResolver::new(config.on_duplicate, &config.output_dir, &config.errors_dir);
        Self {
            config,
            scrubber,
            duplicates,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// Run one pass now.
    pub async fn run(&self) -> Result<RunOutcome, IntakeError> {
        self.run_at(SystemTime::now()).await
    }

    /// Run one pass, judging file ages against `now`.
    pub async fn run_at(&self, now: SystemTime) -> Result<RunOutcome, IntakeError> {
        let config = &self.config;

        let lock_path = config.lock_file();
        preflight::check_lock_parent(&lock_path)?;
        let Some(_lock) = RunLock::try_acquire(&lock_path)? else {
            info!(lock = %lock_path.display(), "another run is in progress; exiting");
            return Ok(RunOutcome::LockHeld);
        };

        preflight::check_directories(config)?;
        let temp_names = TempNameMatcher::new(&config.temp_patterns)?;
        let guard = PathGuard::new(&config.allowed_roots())?;

        if !config.dry_run {
            let swept = sweep_staging(&config.output_dir);
            if swept > 0 {
                warn!(swept, "removed staging left by an interrupted run");
            }
        }

        let store = StateStore::open(&config.state_location());
        let mut records = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable state; starting empty");
            StateMap::new()
        });
        let mut gate = StabilityGate::new(config.stable_seconds);
        if !store.is_persistent() {
            gate = gate.degraded();
        }

        let scanner = CandidateScanner::new(&config.input_dir, config.recursive, temp_names);
        let candidates = scanner.scan()?;

        let started = Instant::now();
        let mut pass = Pass {
            summary: RunSummary::new(Utc::now()),
            records: &mut records,
            seen: HashSet::new(),
            handed_over: 0,
        };
        let mut aborted = None;

        info!(
            input = %config.input_dir.display(),
            stable_seconds = config.stable_seconds,
            dry_run = config.dry_run,
            "intake pass started"
        );

        for item in candidates {
            let candidate = match item {
                Ok(candidate) => candidate,
                Err(warning) if warning.kind == WarningKind::Aborted => {
                    aborted = Some(IntakeError::Scan {
                        path: warning.path,
                        message: warning.message,
                    });
                    break;
                }
                Err(_) => {
                    pass.summary.scan_warnings += 1;
                    continue;
                }
            };
            self.handle(&mut pass, &guard, &gate, candidate, now).await;
        }

        let Pass { mut summary, seen, .. } = pass;

        if aborted.is_none() {
            let dropped = retain_seen(&mut records, &seen);
            if dropped > 0 {
                debug!(dropped, "forgot paths no longer in intake");
            }
        }

        summary.state = if config.dry_run {
            StateStatus::NotSaved
        } else if !store.is_persistent() {
            StateStatus::Disabled
        } else {
            match store.save(&records) {
                Ok(()) => StateStatus::Saved,
                Err(e) => {
                    warn!(error = %e, "state not saved");
                    StateStatus::SaveFailed
                }
            }
        };
        summary.duration = started.elapsed();
        debug_assert!(summary.is_consistent());

        info!(
            total = summary.total,
            scrubbed = summary.scrubbed,
            skipped = summary.skipped_total(),
            errors = summary.errors,
            "intake pass finished"
        );

        Ok(RunOutcome::Completed(RunReport {
            summary,
            error: aborted,
        }))
    }

    async fn handle(
        &self,
        pass: &mut Pass<'_>,
        guard: &PathGuard,
        gate: &StabilityGate,
        candidate: CandidateFile,
        now: SystemTime,
    ) {
        let key = candidate.key();
        pass.seen.insert(key.clone());

        if let Err(violation) = guard.check_read(&candidate.path) {
            warn!(path = %candidate.path.display(), reason = %violation, "refusing unsafe path");
            pass.summary.record_skip(SkipReason::Unsafe);
            return;
        }

        match gate.evaluate(&candidate, &mut *pass.records, now) {
            StabilityDecision::Stable => {}
            StabilityDecision::TemporaryName => {
                debug!(path = %candidate.path.display(), "upload in progress");
                pass.summary.record_skip(SkipReason::Temporary);
                return;
            }
            decision @ (StabilityDecision::TooNew | StabilityDecision::Changed) => {
                debug!(path = %candidate.path.display(), %decision, "not stable yet");
                pass.summary.record_skip(SkipReason::Unstable);
                return;
            }
        }

        if self.config.dry_run {
            info!(path = %candidate.path.display(), "would scrub");
            pass.summary.record_skip(SkipReason::DryRun);
            return;
        }
        if self
            .config
            .max_files
            .is_some_and(|limit| pass.handed_over >= limit)
        {
            debug!(path = %candidate.path.display(), "per-run limit reached; deferred");
            pass.summary.record_skip(SkipReason::Deferred);
            return;
        }
        pass.handed_over += 1;

        if self.duplicates.existing_output(&candidate.name).is_some() {
            match self.duplicates.resolve(guard, &candidate.path) {
                Ok(outcome) => {
                    pass.summary.record_duplicate(outcome.is_moved());
                    pass.records.remove(&key);
                }
                Err(e) if e.is_unsafe() => {
                    warn!(path = %candidate.path.display(), reason = %e, "refusing unsafe path");
                    pass.summary.record_skip(SkipReason::Unsafe);
                }
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "duplicate not resolved");
                    pass.summary.record_error(&candidate.path, e.to_string());
                }
            }
            return;
        }

        info!(path = %candidate.path.display(), "scrubbing");
        match self.scrubber.scrub(guard, &candidate.path).await {
            Ok(report) => {
                pass.summary.record_scrubbed(report.bytes);
                if report.original != OriginalFate::Retained {
                    pass.records.remove(&key);
                }
            }
            Err(failure) if failure.is_unsafe() => {
                pass.summary.record_skip(SkipReason::Unsafe);
            }
            Err(failure) => {
                pass.summary
                    .record_error(&candidate.path, failure.error.to_string());
                if failure.original != OriginalFate::Retained {
                    pass.records.remove(&key);
                }
            }
        }
    }
}

/// Mutable bookkeeping for one pass.
struct Pass<'a> {
    summary: RunSummary,
    records: &'a mut StateMap,
    seen: HashSet<String>,
    handed_over: usize,
}
