//! Portable run lock for platforms without `flock`
//!
//! Ownership is an atomically created directory next to the lock file. The
//! owner refreshes a heartbeat file inside it; a heartbeat older than
//! `STALE_AFTER` means the owner died without cleaning up.

use crate::lock::write_owner;
use crate::HarvestError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const STALE_AFTER: Duration = Duration::from_secs(120);
const TICK: Duration = Duration::from_millis(250);

pub(crate) struct HeartbeatGuard {
    path: PathBuf,
    dir: PathBuf,
    stop: Arc<AtomicBool>,
    beater: Option<JoinHandle<()>>,
}

pub(crate) fn lock_dir(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".d");
    path.with_file_name(name)
}

fn heartbeat_file(dir: &Path) -> PathBuf {
    dir.join("heartbeat")
}

impl HeartbeatGuard {
    pub(crate) fn acquire(path: &Path) -> Result<Self, HarvestError> {
        let dir = lock_dir(path);

        if let Err(e) = std::fs::create_dir(&dir) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
            if !is_stale(&dir) {
                return Err(HarvestError::LockContention {
                    pid: crate::lock::read_owner(path),
                });
            }
            tracing::warn!("Removing stale lock {} (heartbeat expired)", dir.display());
            std::fs::remove_dir_all(&dir)?;
            std::fs::create_dir(&dir).map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => HarvestError::LockContention { pid: None },
                _ => e.into(),
            })?;
        }

        let own_pid = std::process::id();
        std::fs::write(heartbeat_file(&dir), own_pid.to_string())?;
        let mut file = std::fs::File::create(path)?;
        write_owner(&mut file, own_pid)?;

        let stop = Arc::new(AtomicBool::new(false));
        let beater = spawn_beater(heartbeat_file(&dir), Arc::clone(&stop));

        Ok(Self {
            path: path.to_path_buf(),
            dir,
            stop,
            beater: Some(beater),
        })
    }

    pub(crate) fn release(&mut self) {
        let Some(beater) = self.beater.take() else {
            return;
        };

        self.stop.store(true, Ordering::SeqCst);
        let _ = beater.join();

        let _ = std::fs::remove_file(&self.path);
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove lock {}: {}", self.dir.display(), e);
            }
        }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_stale(dir: &Path) -> bool {
    let modified = std::fs::metadata(heartbeat_file(dir)).and_then(|m| m.modified());
    match modified {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age > STALE_AFTER)
            .unwrap_or(false),
        // Owner crashed between creating the directory and the first beat
        Err(_) => std::fs::metadata(dir)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .map(|age| age > STALE_AFTER)
            .unwrap_or(true),
    }
}

fn spawn_beater(file: PathBuf, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut since_beat = Duration::ZERO;
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(TICK);
            since_beat += TICK;
            if since_beat >= HEARTBEAT_INTERVAL {
                since_beat = Duration::ZERO;
                if let Err(e) = std::fs::write(&file, std::process::id().to_string()) {
                    tracing::warn!("Lock heartbeat failed: {}", e);
                }
            }
        }
    })
}
