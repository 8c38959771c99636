//! Process-wide single-flight lock for full harvest runs
//!
//! The lock file holds `PID: <pid>` of its owner. A lock whose owner is no
//! longer alive is stale and is taken over; a live owner means another run
//! is in progress and acquisition fails with `LockContention`. On unix the
//! file is additionally held with an exclusive `flock` so two processes
//! racing past the PID check cannot both win.

#[cfg(unix)]
mod flock;
#[cfg_attr(unix, allow(dead_code))]
mod heartbeat;

use crate::HarvestError;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
type Guard = flock::FlockGuard;
#[cfg(not(unix))]
type Guard = heartbeat::HeartbeatGuard;

/// Held run lock; released on `release()` or drop
pub struct RunLock {
    path: PathBuf,
    guard: Guard,
}

impl RunLock {
    /// Acquires the lock at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(RunLock)` - This process now owns the run
    /// * `Err(HarvestError::LockContention)` - Another live run holds it
    /// * `Err(HarvestError)` - The lock file could not be created
    pub fn acquire(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let guard = Guard::acquire(path)?;
        tracing::debug!("Acquired run lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlocks and removes the lock file
    pub fn release(mut self) {
        self.guard.release();
        tracing::debug!("Released run lock {}", self.path.display());
    }

    /// Removes a previous lock unconditionally
    ///
    /// # Returns
    ///
    /// `true` if something was removed
    pub fn force_clear(path: &Path) -> io::Result<bool> {
        let mut removed = false;

        match std::fs::remove_file(path) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        match std::fs::remove_dir_all(heartbeat::lock_dir(path)) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(removed)
    }
}

/// Parses the owner PID out of a lock file
pub fn read_owner(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("PID:"))
        .and_then(|pid| pid.trim().parse().ok())
}

fn write_owner(file: &mut std::fs::File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "PID: {}", pid)?;
    file.flush()
}
