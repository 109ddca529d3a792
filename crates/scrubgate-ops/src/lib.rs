//! Scrub execution and run orchestration for scrubgate.
//!
//! This crate performs everything that changes the filesystem: running the
//! tag-scrubbing engine, publishing outputs, routing originals and resolving
//! duplicates. [`Runner`] sequences one bounded intake pass under an
//! advisory run lock.

mod duplicate;
mod engine;
mod lock;
mod operation;
pub mod preflight;
mod relocate;
mod runner;
mod scrub;

pub use duplicate::{DuplicateOutcome, DuplicateResolver};
pub use engine::{
    EngineOutput, ExiftoolEngine, MAX_COMMENT_BYTES, MAX_COPYRIGHT_BYTES, PRESERVED_BUNDLES,
    PRESERVED_TAGS, ScrubEngine, TAG_GROUPS, preserve_args, truncate_utf8,
};
pub use lock::RunLock;
pub use operation::OperationError;
pub use relocate::{relocate, remove, unique_destination};
pub use runner::{RunOutcome, RunReport, Runner};
pub use scrub::{OriginalFate, STAGING_PREFIX, ScrubFailure, ScrubReport, Scrubber, sweep_staging};

// Re-export core types for convenience
pub use scrubgate_core::{IntakeConfig, IntakeError, RunSummary, SkipReason, StateStatus};
