//! Intake scanning for scrubgate.
//!
//! This crate turns the hot folder into a lazy sequence of
//! [`CandidateFile`]s and decides whether a path may be touched at all.
//!
//! # Overview
//!
//! - [`CandidateScanner`] walks the intake directory with jwalk (serial,
//!   sorted, never following links) and classifies each entry.
//! - [`TempNameMatcher`] flags names of uploads still in progress.
//! - [`PathGuard`] validates every read and write against the allowed roots.
//!
//! # Example
//!
//! ```rust,no_run
//! use scrubgate_scan::{CandidateScanner, PathGuard, TempNameMatcher};
//!
//! let scanner = CandidateScanner::new("/photos/input", false, TempNameMatcher::default());
//! let guard = PathGuard::new(&["/photos/input"]).unwrap();
//!
//! for candidate in scanner.scan().unwrap().flatten() {
//!     match guard.check_read(&candidate.path) {
//!         Ok(path) => println!("ok: {}", path.display()),
//!         Err(violation) => println!("refused: {violation}"),
//!     }
//! }
//! ```

mod guard;
mod scanner;
mod temp_names;

pub use guard::PathGuard;
pub use scanner::{CandidateIter, CandidateScanner};
pub use temp_names::TempNameMatcher;

// Re-export core types for convenience
pub use scrubgate_core::{CandidateFile, ImageClass, SafetyViolation, ScanWarning, WarningKind};
