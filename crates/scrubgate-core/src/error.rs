//! Error types for the intake pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A path was refused by the safety guard.
///
/// The offending path is never rewritten or "fixed"; the file is skipped.
#[derive(Debug, Error)]
pub enum SafetyViolation {
    /// Path is relative.
    #[error("Path is not absolute: {path}")]
    NotAbsolute { path: PathBuf },

    /// Path contains a `..` component.
    #[error("Path traversal attempt: {path}")]
    Traversal { path: PathBuf },

    /// Path contains bytes the engine invocation cannot carry safely.
    #[error("Path contains unsafe characters: {path}")]
    UnsafeCharacters { path: PathBuf },

    /// Path lies outside every allowed root.
    #[error("Path escapes allowed roots: {path}")]
    EscapesRoot { path: PathBuf },

    /// A component of the path is a symbolic link.
    #[error("Symbolic link not allowed: {link} (in {path})")]
    Symlink { path: PathBuf, link: PathBuf },

    /// The path exists but is not a regular file.
    #[error("Not a regular file: {path}")]
    NotAFile { path: PathBuf },

    /// The path could not be inspected.
    #[error("Cannot inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SafetyViolation {
    /// The path that was refused.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::NotAbsolute { path }
            | Self::Traversal { path }
            | Self::UnsafeCharacters { path }
            | Self::EscapesRoot { path }
            | Self::Symlink { path, .. }
            | Self::NotAFile { path }
            | Self::Io { path, .. } => path,
        }
    }
}

/// Errors reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but could not be read.
    #[error("Cannot read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON of the expected shape.
    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The state file could not be written.
    #[error("Cannot write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state could not be encoded.
    #[error("Cannot encode state: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// A required directory is missing, not a directory, a symlink or not writable.
    #[error("{label} directory {reason}: {path}")]
    Precondition {
        label: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The run lock could not be opened or locked.
    #[error("Cannot lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The intake directory could not be enumerated.
    #[error("Scan of {path} aborted: {message}")]
    Scan { path: PathBuf, message: String },
}

impl IntakeError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create a precondition failure.
    pub fn precondition(label: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Precondition {
            label,
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error reading a directory entry.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// The scan root itself became unreadable; enumeration stopped.
    Aborted,
}

/// Non-fatal warning encountered during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from a metadata read failure.
    pub fn metadata(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let kind = if error.kind() == std::io::ErrorKind::PermissionDenied {
            WarningKind::PermissionDenied
        } else {
            WarningKind::MetadataError
        };
        Self::new(path, format!("Metadata error: {error}"), kind)
    }
}
