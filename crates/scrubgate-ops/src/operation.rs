//! Per-file operation errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use scrubgate_core::SafetyViolation;

/// A failure while handling one intake file.
///
/// None of these abort the run; the file is routed out of intake and the
/// error text lands in the run summary.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The path guard refused a path.
    #[error(transparent)]
    Unsafe(#[from] SafetyViolation),

    /// A filesystem call failed.
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Refusing to replace an existing output.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// The engine could not be started.
    #[error("Cannot start {program}: {source}")]
    EngineSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine did not finish in time and was killed.
    #[error("Engine timed out after {}s on {path}", .timeout.as_secs())]
    EngineTimeout { path: PathBuf, timeout: Duration },

    /// The engine exited unsuccessfully.
    #[error("Engine failed on {path} ({status}): {diagnostic}")]
    EngineFailed {
        path: PathBuf,
        status: String,
        diagnostic: String,
    },

    /// The engine reported success but wrote nothing.
    #[error("Engine produced no output for {path}")]
    MissingOutput { path: PathBuf },
}

impl OperationError {
    /// Create an I/O error with the attempted action and path.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether this is a path safety refusal rather than a processing failure.
    pub fn is_unsafe(&self) -> bool {
        matches!(self, Self::Unsafe(_))
    }
}

/// First non-empty line of engine diagnostics, or a placeholder.
pub(crate) fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostic output")
        .to_string()
}
