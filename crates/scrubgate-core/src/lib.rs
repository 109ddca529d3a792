//! Core types for scrubgate.
//!
//! This crate provides the data model shared by the intake pipeline:
//! configuration, scan candidates, persisted state records, run summaries
//! and the error types that cross crate boundaries.

mod candidate;
mod config;
mod error;
mod summary;

pub use candidate::{CandidateFile, ImageClass, StateMap, StateRecord, epoch_seconds};
pub use config::{
    DEFAULT_ENGINE_TIMEOUT_SECS, DEFAULT_STABLE_SECONDS, DEFAULT_TEMP_PATTERNS, DuplicatePolicy,
    EngineConfig, IntakeConfig, IntakeConfigBuilder, LOCK_FILE_NAME, STATE_FILE_NAME,
    StateLocation, default_temp_patterns,
};
pub use error::{IntakeError, SafetyViolation, ScanWarning, StateError, WarningKind};
pub use summary::{
    FailureRecord, RunSummary, SUMMARY_PREFIX, SkipCounts, SkipReason, StateStatus,
};
