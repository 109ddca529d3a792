//! Atomic JSON persistence of per-path observations.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use strum::Display;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use scrubgate_core::{StateError, StateLocation, StateMap};

/// Why persistence is off for this run.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DisabledReason {
    /// Switched off in the configuration.
    #[strum(to_string = "disabled by configuration")]
    Configured,
    /// The configured location could not be written.
    #[strum(to_string = "state location not writable: {message}")]
    Unwritable { message: String },
}

/// Where observations go for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    /// JSON file at this path.
    Persistent(PathBuf),
    /// Nothing is read or written.
    Disabled(DisabledReason),
}

/// Loads and saves the observation map.
///
/// A store that cannot write its location disables itself at open time
/// rather than failing later or writing somewhere else.
#[derive(Debug, Clone)]
pub struct StateStore {
    backend: StateBackend,
}

impl StateStore {
    /// Open the store for `location`, probing that it can be written.
    pub fn open(location: &StateLocation) -> Self {
        let path = match location {
            StateLocation::Disabled => return Self::disabled(DisabledReason::Configured),
            StateLocation::Path(path) => path,
        };

        match probe(path) {
            Ok(()) => {
                debug!(path = %path.display(), "state persistence enabled");
                Self {
                    backend: StateBackend::Persistent(path.clone()),
                }
            }
            Err(message) => {
                warn!(
                    path = %path.display(),
                    reason = %message,
                    "state file not writable; running without persisted state"
                );
                Self::disabled(DisabledReason::Unwritable { message })
            }
        }
    }

    /// A store that never reads or writes.
    pub fn disabled(reason: DisabledReason) -> Self {
        Self {
            backend: StateBackend::Disabled(reason),
        }
    }

    /// The active backend.
    pub fn backend(&self) -> &StateBackend {
        &self.backend
    }

    /// Whether observations survive this run.
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StateBackend::Persistent(_))
    }

    /// Path of the state file when persistent.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            StateBackend::Persistent(path) => Some(path),
            StateBackend::Disabled(_) => None,
        }
    }

    /// Read the stored map. Missing file and disabled store both give an empty map.
    pub fn load(&self) -> Result<StateMap, StateError> {
        let Some(path) = self.path() else {
            return Ok(StateMap::new());
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateMap::new()),
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateMap::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the stored map atomically: temp file beside the target, fsync, rename.
    ///
    /// Does nothing when persistence is disabled.
    pub fn save(&self, map: &StateMap) -> Result<(), StateError> {
        let Some(path) = self.path() else {
            return Ok(());
        };

        let mut bytes =
            serde_json::to_vec_pretty(map).map_err(|source| StateError::Encode { source })?;
        bytes.push(b'\n');

        let write_err = |source| StateError::Write {
            path: path.to_path_buf(),
            source,
        };
        let parent = parent_dir(path);
        let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
        temp.write_all(&bytes).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(path).map_err(|e| write_err(e.error))?;
        sync_dir(parent);

        debug!(path = %path.display(), records = map.len(), "state saved");
        Ok(())
    }
}

/// Drop records whose path was not seen in the current scan.
///
/// Returns the number of records removed.
pub fn retain_seen(map: &mut StateMap, seen: &HashSet<String>) -> usize {
    let before = map.len();
    map.retain(|key, _| seen.contains(key));
    before - map.len()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Make sure the state file's directory exists and accepts new files.
fn probe(path: &Path) -> Result<(), String> {
    if path.is_dir() {
        return Err(format!("{} is a directory", path.display()));
    }
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)
        .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    NamedTempFile::new_in(parent)
        .map(drop)
        .map_err(|e| format!("cannot write in {}: {e}", parent.display()))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
