//! Path safety checks for every read and write the pipeline performs.

use std::io;
use std::path::{Component, Path, PathBuf};

use scrubgate_core::{IntakeError, SafetyViolation};

/// One allowed root, as configured and as resolved.
#[derive(Debug, Clone)]
struct Root {
    given: PathBuf,
    canonical: PathBuf,
}

/// What the caller intends to do with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Validates paths against a fixed set of allowed roots.
///
/// The guard never touches the filesystem beyond `lstat` and `canonicalize`;
/// a refused path is reported, never repaired.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<Root>,
}

impl PathGuard {
    /// Create a guard over `roots`. Each root must exist.
    pub fn new<P: AsRef<Path>>(roots: &[P]) -> Result<Self, IntakeError> {
        let roots = roots
            .iter()
            .map(|root| {
                let given = root.as_ref().to_path_buf();
                let canonical = given
                    .canonicalize()
                    .map_err(|e| IntakeError::io(&given, e))?;
                Ok(Root { given, canonical })
            })
            .collect::<Result<Vec<_>, IntakeError>>()?;
        Ok(Self { roots })
    }

    /// Validate an existing regular file that is about to be read, moved or deleted.
    pub fn check_read(&self, path: &Path) -> Result<PathBuf, SafetyViolation> {
        self.check(path, Access::Read)
    }

    /// Validate a destination that is about to be created or replaced.
    ///
    /// The final component may be missing; everything above it must exist.
    pub fn check_write(&self, path: &Path) -> Result<PathBuf, SafetyViolation> {
        self.check(path, Access::Write)
    }

    fn check(&self, path: &Path, access: Access) -> Result<PathBuf, SafetyViolation> {
        let owned = || path.to_path_buf();

        if !path.is_absolute() {
            return Err(SafetyViolation::NotAbsolute { path: owned() });
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(SafetyViolation::Traversal { path: owned() });
        }
        match path.to_str() {
            Some(text) if !text.chars().any(char::is_control) => {}
            _ => return Err(SafetyViolation::UnsafeCharacters { path: owned() }),
        }

        let (root, base) = self
            .match_root(path)
            .ok_or_else(|| SafetyViolation::EscapesRoot { path: owned() })?;

        let relative = path
            .strip_prefix(base)
            .map_err(|_| SafetyViolation::EscapesRoot { path: owned() })?;
        let below: Vec<_> = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        if below.is_empty() {
            // The root itself is never a file target.
            return Err(SafetyViolation::NotAFile { path: owned() });
        }

        reject_symlink(path, base)?;

        let mut current = base.to_path_buf();
        let last = below.len() - 1;
        for (index, component) in below.iter().enumerate() {
            current.push(component);
            match std::fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(SafetyViolation::Symlink {
                        path: owned(),
                        link: current,
                    });
                }
                Ok(meta) if index == last => {
                    if !meta.is_file() {
                        return Err(SafetyViolation::NotAFile { path: owned() });
                    }
                }
                Ok(meta) if !meta.is_dir() => {
                    return Err(SafetyViolation::NotAFile { path: owned() });
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound && index == last => {
                    if access == Access::Read {
                        return Err(SafetyViolation::Io {
                            path: owned(),
                            source: e,
                        });
                    }
                }
                Err(e) => {
                    return Err(SafetyViolation::Io {
                        path: owned(),
                        source: e,
                    });
                }
            }
        }

        // Resolve the deepest existing ancestor and confirm it stays inside the root.
        let existing = match access {
            Access::Read => path,
            Access::Write => path.parent().unwrap_or(base),
        };
        let resolved = existing.canonicalize().map_err(|e| SafetyViolation::Io {
            path: owned(),
            source: e,
        })?;
        if !resolved.starts_with(&root.canonical) {
            return Err(SafetyViolation::EscapesRoot { path: owned() });
        }

        Ok(path.to_path_buf())
    }

    /// The longest root that prefixes `path`, with the prefix form that matched.
    fn match_root<'a>(&'a self, path: &Path) -> Option<(&'a Root, &'a Path)> {
        self.roots
            .iter()
            .flat_map(move |root| {
                [root.given.as_path(), root.canonical.as_path()]
                    .into_iter()
                    .filter(move |base| path.starts_with(base))
                    .map(move |base| (root, base))
            })
            .max_by_key(|(_, base)| base.components().count())
    }
}

fn reject_symlink(path: &Path, root: &Path) -> Result<(), SafetyViolation> {
    match std::fs::symlink_metadata(root) {
        Ok(meta) if meta.file_type().is_symlink() => Err(SafetyViolation::Symlink {
            path: path.to_path_buf(),
            link: root.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(e) => Err(SafetyViolation::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
