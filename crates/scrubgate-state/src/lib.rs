//! Durable observations and stability decisions for scrubgate.
//!
//! A file in the hot folder is only scrubbed once it has stopped changing.
//! Because each run is a short-lived process, what was seen last time is
//! kept in a small JSON file:
//!
//! - [`StateStore`] loads and atomically saves the per-path records, or
//!   disables itself when its location cannot be written.
//! - [`StabilityGate`] compares the current observation with the stored
//!   record and returns a [`StabilityDecision`].
//!
//! ```rust,no_run
//! use std::time::SystemTime;
//! use scrubgate_core::StateLocation;
//! use scrubgate_state::{StabilityGate, StateStore};
//!
//! let store = StateStore::open(&StateLocation::Path("/photos/processed/state.json".into()));
//! let mut records = store.load().unwrap_or_default();
//! let gate = StabilityGate::new(120);
//! # let candidate: scrubgate_core::CandidateFile = todo!();
//! let decision = gate.evaluate(&candidate, &mut records, SystemTime::now());
//! println!("{decision}");
//! store.save(&records).unwrap();
//! ```

mod stability;
mod store;

pub use stability::{StabilityDecision, StabilityGate};
pub use store::{DisabledReason, StateBackend, StateStore, retain_seen};

// Re-export core types
pub use scrubgate_core::{StateError, StateLocation, StateMap, StateRecord};
