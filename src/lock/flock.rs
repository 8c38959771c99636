//! `flock(2)`-backed run lock

use crate::lock::{read_owner, write_owner};
use crate::HarvestError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub(crate) struct FlockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl FlockGuard {
    pub(crate) fn acquire(path: &Path) -> Result<Self, HarvestError> {
        let own_pid = std::process::id();

        if let Some(pid) = read_owner(path) {
            if pid != own_pid && pid_alive(pid) {
                return Err(HarvestError::LockContention { pid: Some(pid) });
            }
            tracing::warn!("Removing stale lock {} (PID {} is gone)", path.display(), pid);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(HarvestError::LockContention {
                    pid: read_owner(path),
                });
            }
            return Err(HarvestError::Lock(format!(
                "flock on {} failed: {}",
                path.display(),
                err
            )));
        }

        write_owner(&mut file, own_pid)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub(crate) fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        // Remove while still holding the lock so a new owner never loses its file
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove lock {}: {}", self.path.display(), e);
            }
        }

        // SAFETY: as above; the descriptor is closed when `file` drops.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signal 0 probes for existence; EPERM still means the process exists
pub(crate) fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: kill with signal 0 performs permission and existence checks only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
