//! Handling of intake files whose name is already published.

use std::path::{Path, PathBuf};

use tracing::info;

use scrubgate_core::DuplicatePolicy;
use scrubgate_scan::PathGuard;

use crate::relocate::{relocate, remove};
use crate::OperationError;

/// What happened to a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateOutcome {
    /// The intake copy was removed.
    Deleted,
    /// The intake copy now lives at this path in the quarantine directory.
    Quarantined(PathBuf),
}

impl DuplicateOutcome {
    /// Whether the file was moved rather than removed.
    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Quarantined(_))
    }
}

/// Applies the duplicate policy for one run.
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    policy: DuplicatePolicy,
    output_dir: PathBuf,
    quarantine_dir: PathBuf,
}

impl DuplicateResolver {
    /// Create a resolver comparing against `output_dir` and quarantining into `quarantine_dir`.
    pub fn new(
        policy: DuplicatePolicy,
        output_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            policy,
            output_dir: output_dir.into(),
            quarantine_dir: quarantine_dir.into(),
        }
    }

    /// The active policy.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// The published path that collides with `name`, if any entry of any kind exists there.
    pub fn existing_output(&self, name: &str) -> Option<PathBuf> {
        let target = self.output_dir.join(name);
        std::fs::symlink_metadata(&target).ok().map(|_| target)
    }

    /// Take `source` out of intake according to the policy.
    pub fn resolve(&self, guard: &PathGuard, source: &Path) -> Result<DuplicateOutcome, OperationError> {
        match self.policy {
            DuplicatePolicy::Delete => {
                remove(guard, source)?;
                info!(path = %source.display(), "duplicate deleted");
                Ok(DuplicateOutcome::Deleted)
            }
            DuplicatePolicy::Quarantine => {
                let dest = relocate(guard, source, &self.quarantine_dir)?;
                info!(
                    path = %source.display(),
                    to = %dest.display(),
                    "duplicate quarantined"
                );
                Ok(DuplicateOutcome::Quarantined(dest))
            }
        }
    }
}
