//! Intake candidates and their durable observations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Image family an intake file belongs to, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageClass {
    /// `.jpg` / `.jpeg`, any case.
    Jpeg,
}

impl ImageClass {
    /// Classify a bare extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    /// Classify a file name.
    ///
    /// Temporary names are classified by the extension beneath the temporary
    /// suffix, so `photo.jpg.part` is a jpeg still being uploaded.
    pub fn from_name(name: &str, looks_temporary: bool) -> Option<Self> {
        let path = Path::new(name);
        let direct = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension);
        if direct.is_some() || !looks_temporary {
            return direct;
        }
        path.file_stem()
            .map(Path::new)
            .and_then(|stem| stem.extension())
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// One file found in the intake directory during the current scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Absolute path.
    pub path: PathBuf,

    /// File name (not full path).
    pub name: CompactString,

    /// Size in bytes (of the link itself for symlinks).
    pub size: u64,

    /// Last modification time.
    pub modified: SystemTime,

    /// Image family.
    pub class: ImageClass,

    /// Name matches an in-progress upload pattern.
    pub looks_temporary: bool,

    /// The entry itself is a symbolic link.
    pub is_symlink: bool,
}

impl CandidateFile {
    /// Identity used to key state records.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Time since last modification, zero for modification times in the future.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or(Duration::ZERO)
    }
}

/// Persisted observation of one intake path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Size in bytes at the last observation.
    pub size: u64,
    /// Modification time at the last observation, seconds since the Unix epoch.
    pub mtime: f64,
    /// When the path was first observed, seconds since the Unix epoch.
    pub first_seen: f64,
}

impl StateRecord {
    /// Record a first observation of `candidate`.
    pub fn first_observation(candidate: &CandidateFile, now: SystemTime) -> Self {
        Self {
            size: candidate.size,
            mtime: epoch_seconds(candidate.modified),
            first_seen: epoch_seconds(now),
        }
    }

    /// Whether `candidate` still has the recorded size and modification time.
    pub fn matches(&self, candidate: &CandidateFile) -> bool {
        self.size == candidate.size && self.mtime == epoch_seconds(candidate.modified)
    }

    /// A copy updated to the candidate's current size and mtime, keeping `first_seen`.
    pub fn updated(&self, candidate: &CandidateFile) -> Self {
        Self {
            size: candidate.size,
            mtime: epoch_seconds(candidate.modified),
            first_seen: self.first_seen,
        }
    }
}

/// All persisted observations, keyed by path string.
pub type StateMap = BTreeMap<String, StateRecord>;

/// Seconds since the Unix epoch as a float (negative before the epoch).
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(err) => -err.duration().as_secs_f64(),
    }
}
