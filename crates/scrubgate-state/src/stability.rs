//! Readiness verdicts for intake files.

use std::time::{Duration, SystemTime};

use strum::Display;

use scrubgate_core::{CandidateFile, StateMap, StateRecord};

/// Whether a candidate may be handed to the scrubber in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StabilityDecision {
    /// Unchanged, but modified less than the window ago.
    TooNew,
    /// Size or modification time differs from the last observation.
    Changed,
    /// Name looks like an upload in progress.
    TemporaryName,
    /// Unchanged and older than the window.
    Stable,
}

impl StabilityDecision {
    /// Whether the file may proceed.
    pub fn is_stable(self) -> bool {
        self == Self::Stable
    }
}

/// Decides readiness from the current observation and the stored record.
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    window: Duration,
    consult_records: bool,
}

impl StabilityGate {
    /// Gate with a window of `stable_seconds`.
    pub fn new(stable_seconds: u64) -> Self {
        Self {
            window: Duration::from_secs(stable_seconds),
            consult_records: true,
        }
    }

    /// Ignore stored records; every file is judged as a first observation.
    pub fn degraded(mut self) -> Self {
        self.consult_records = false;
        self
    }

    /// The stability window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Judge `candidate` at `now`, updating its record in `records`.
    pub fn evaluate(
        &self,
        candidate: &CandidateFile,
        records: &mut StateMap,
        now: SystemTime,
    ) -> StabilityDecision {
        let key = candidate.key();
        let previous = if self.consult_records {
            records.get(&key).copied()
        } else {
            None
        };

        let (record, changed) = match previous {
            None => (StateRecord::first_observation(candidate, now), false),
            Some(record) if record.matches(candidate) => (record, false),
            Some(record) => (record.updated(candidate), true),
        };
        records.insert(key, record);

        if candidate.looks_temporary {
            StabilityDecision::TemporaryName
        } else if changed {
            StabilityDecision::Changed
        } else if candidate.age(now) >= self.window {
            StabilityDecision::Stable
        } else {
            StabilityDecision::TooNew
        }
    }
}
