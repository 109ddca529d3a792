//! Advisory lock preventing overlapping runs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use scrubgate_core::IntakeError;

/// Exclusive `flock` held for the lifetime of a run.
///
/// The lock is released when this value is dropped, and by the kernel if the
/// process dies.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock at `path` without blocking.
    ///
    /// Returns `Ok(None)` when another run holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, IntakeError> {
        let lock_err = |source| IntakeError::Lock {
            path: path.to_path_buf(),
            source,
        };

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            // A lock file that is itself a symlink is refused.
            options.custom_flags(libc::O_NOFOLLOW);
        }
        let file = options.open(path).map_err(lock_err)?;

        if !try_flock_exclusive(&file).map_err(lock_err)? {
            debug!(path = %path.display(), "lock held by another run");
            return Ok(None);
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        // The pid is informational only; failing to record it does not release the lock.
        let _ = lock.record_pid();
        debug!(path = %path.display(), "lock acquired");
        Ok(Some(lock))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_pid(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()
    }
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if the file is
/// already locked by another open handle.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}
