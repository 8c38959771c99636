//! Single-flight triggers over the cycle runner
//!
//! A cycle, a harvest-only run and an extraction-only run all share one
//! in-memory flag: whichever starts first runs, the others report
//! `AlreadyRunning` without doing anything.

use crate::scheduler::cycle::{CycleReport, CycleRunner};
use crate::scheduler::status::{CycleStatus, StatusRecord};
use crate::supervise::StageOutcome;
use crate::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result of a guarded trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Triggered<T> {
    Ran(T),
    AlreadyRunning,
}

impl<T> Triggered<T> {
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning)
    }
}

/// Clears the in-flight flag when dropped
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Update scheduler
#[derive(Clone)]
pub struct Scheduler {
    runner: Arc<CycleRunner>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(runner: CycleRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    /// A guarded run is in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Option<InFlight> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(Arc::clone(&self.running)))
    }

    /// Runs one full cycle unless one is already in flight
    pub async fn trigger(&self) -> Result<Triggered<CycleReport>> {
        let Some(_guard) = self.begin() else {
            tracing::info!("Update already in progress, trigger ignored");
            return Ok(Triggered::AlreadyRunning);
        };
        tracing::info!("Update cycle starting");
        let report = self.runner.run_cycle().await?;
        tracing::info!(
            "Update cycle finished: harvest {}, extraction {}",
            report.harvest,
            report.extract
        );
        Ok(Triggered::Ran(report))
    }

    pub async fn trigger_harvest(&self) -> Result<Triggered<StageOutcome>> {
        let Some(_guard) = self.begin() else {
            return Ok(Triggered::AlreadyRunning);
        };
        Ok(Triggered::Ran(self.runner.run_harvest_only().await?))
    }

    pub async fn trigger_extract(&self) -> Result<Triggered<StageOutcome>> {
        let Some(_guard) = self.begin() else {
            return Ok(Triggered::AlreadyRunning);
        };
        Ok(Triggered::Ran(self.runner.run_extract_only().await?))
    }

    /// Spawns a task that triggers a cycle every `every`, first after `initial_delay`
    ///
    /// Ticks that land while a cycle is running are skipped. Abort the
    /// returned handle to stop the task.
    pub fn spawn_periodic(&self, every: Duration, initial_delay: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                "Periodic updates every {} minute(s)",
                every.as_secs() / 60
            );
            tokio::time::sleep(initial_delay).await;

            loop {
                match scheduler.trigger().await {
                    Ok(Triggered::AlreadyRunning) => {
                        tracing::info!("Scheduled update skipped, update already in progress")
                    }
                    Ok(Triggered::Ran(_)) => {}
                    Err(e) => tracing::error!("Scheduled update failed: {}", e),
                }
                tokio::time::sleep(every).await;
            }
        })
    }

    /// Runs cycles whenever `interval` has passed since the last scrape
    ///
    /// # Arguments
    ///
    /// * `interval` - Minimum spacing between cycles
    /// * `poll` - How often to check
    /// * `victims_file` - Fallback clock when no scrape was ever recorded
    /// * `shutdown` - Resolves when the daemon should stop
    pub async fn run_daemon<F>(
        &self,
        interval: Duration,
        poll: Duration,
        victims_file: &Path,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let status = self.runner.status();
        let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);

        status.update(|r| r.status = CycleStatus::Idle)?;
        tracing::info!(
            "Scheduler daemon started, interval {}h",
            interval.num_hours()
        );

        loop {
            let last = last_scrape_time(&status.read(), victims_file);
            if should_run(Utc::now(), last, interval) {
                tokio::select! {
                    result = self.trigger() => {
                        if let Err(e) = result {
                            tracing::error!("Update cycle failed: {}", e);
                            status.update_logged(|r| r.set_error(&e.to_string(), Utc::now()));
                        }
                    }
                    _ = &mut shutdown => break,
                }
            } else if let Some(next) = last.and_then(|l| l.checked_add_signed(interval)) {
                tracing::info!("Next update scheduled for {}", next.to_rfc3339());
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("Scheduler stopped");
        status.update(|r| r.status = CycleStatus::Stopped)?;
        Ok(())
    }
}

/// Whether a cycle is due
///
/// # Returns
///
/// `true` when nothing was ever scraped or `interval` has elapsed since `last_scrape`
pub fn should_run(
    now: DateTime<Utc>,
    last_scrape: Option<DateTime<Utc>>,
    interval: chrono::Duration,
) -> bool {
    match last_scrape {
        None => true,
        Some(last) => last
            .checked_add_signed(interval)
            .map_or(false, |next| now >= next),
    }
}

/// Last scrape from the status record, else the extraction output's mtime
pub fn last_scrape_time(record: &StatusRecord, victims_file: &Path) -> Option<DateTime<Utc>> {
    record.last_scrape.or_else(|| {
        std::fs::metadata(victims_file)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    })
}

/// Prints the status record and data file ages for `schedule --status`
pub fn print_status(record: &StatusRecord, data_files: &[PathBuf]) {
    println!("=== Scheduler Status ===\n");

    if record.status == CycleStatus::NeverRun {
        println!("Scheduler has not run yet.");
    } else {
        match serde_json::to_string_pretty(record) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("Status: {:?} ({})", record.status, e),
        }
    }

    println!("\nData Files:");
    let now = std::time::SystemTime::now();
    for path in data_files {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| now.duration_since(m).ok());
        match age {
            Some(age) => {
                let hours = age.as_secs() / 3600;
                println!("  {}: {}d {}h old", name, hours / 24, hours % 24);
            }
            None => println!("  {}: missing", name),
        }
    }
}
