//! One update cycle: full harvest, then full extraction

use crate::config::Config;
use crate::scheduler::status::{CycleStatus, StatusStore};
use crate::supervise::{run_stage, StageCommand, StageOutcome, StageOutput};
use crate::Result;
use chrono::{Local, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LATEST_LOG: &str = "update_latest.log";

/// Outcome of both stages of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub harvest: StageOutcome,
    pub extract: StageOutcome,
    pub log_file: PathBuf,
}

impl CycleReport {
    /// Both stages exited 0
    pub fn is_success(&self) -> bool {
        self.harvest.is_success() && self.extract.is_success()
    }

    fn error_message(&self) -> String {
        let mut parts = Vec::new();
        if !self.harvest.is_success() {
            parts.push(format!("harvest {}", self.harvest));
        }
        if !self.extract.is_success() {
            parts.push(format!("extraction {}", self.extract));
        }
        format!("Update failed: {}", parts.join("; "))
    }
}

/// Runs harvest and extraction stages and records them in the status file
#[derive(Debug, Clone)]
pub struct CycleRunner {
    status: StatusStore,
    logs_dir: PathBuf,
    harvest: StageCommand,
    extract: StageCommand,
    harvest_timeout: Duration,
    extract_timeout: Duration,
}

impl CycleRunner {
    /// Creates a runner
    ///
    /// # Arguments
    ///
    /// * `config` - Status/log paths, timeouts and the extraction command
    /// * `harvest` - Full harvest command
    pub fn new(config: &Config, harvest: StageCommand) -> Result<Self> {
        let extract = StageCommand::from_argv(&config.extract.command)
            .ok_or_else(|| {
                crate::ConfigError::Validation("extract.command cannot be empty".to_string())
            })?
            .in_dir(config.extract.working_dir.clone());

        Ok(Self {
            status: StatusStore::new(config.paths.scheduler_status_file()),
            logs_dir: config.paths.logs_dir(),
            harvest,
            extract,
            harvest_timeout: Duration::from_secs(config.scheduler.harvest_timeout_secs),
            extract_timeout: Duration::from_secs(config.scheduler.extract_timeout_secs),
        })
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// Runs a full cycle
    ///
    /// Extraction is always attempted, even after a failed or timed-out
    /// harvest, since earlier artifacts may still be parsed.
    ///
    /// # Returns
    ///
    /// * `Ok(CycleReport)` - Both stages were attempted; check `is_success`
    /// * `Err(HarvestError)` - The log file could not be created or the status file written
    ///
    /// Later writes to the cycle log are best-effort.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let log_file = self.open_cycle_log()?;
        let started = Utc::now();

        self.status.update(|r| {
            r.status = CycleStatus::Updating;
            r.started_at = Some(started);
            r.message = Some("Update in progress".to_string());
            r.log_file = Some(log_file.clone());
        })?;

        append_log(
            &log_file,
            &format!("=== Update started at {} ===\n", started.to_rfc3339()),
        );

        self.status.update_logged(|r| r.status = CycleStatus::Scraping);
        append_log(&log_file, &format!("[HARVEST] Starting {}\n", self.harvest));
        let harvest = run_stage(
            &self.harvest,
            self.harvest_timeout,
            &StageOutput::File(log_file.clone()),
        )
        .await;
        append_log(&log_file, &format!("\n[HARVEST] {}\n\n", harvest.outcome));
        tracing::info!("Harvest stage {}", harvest.outcome);

        self.status.update_logged(|r| r.status = CycleStatus::Parsing);
        append_log(&log_file, &format!("[EXTRACT] Starting {}\n", self.extract));
        let extract = run_stage(
            &self.extract,
            self.extract_timeout,
            &StageOutput::File(log_file.clone()),
        )
        .await;
        append_log(&log_file, &format!("\n[EXTRACT] {}\n", extract.outcome));
        tracing::info!("Extraction stage {}", extract.outcome);

        let report = CycleReport {
            harvest: harvest.outcome,
            extract: extract.outcome,
            log_file,
        };

        let finished = Utc::now();
        append_log(
            &report.log_file,
            &format!("\n=== Update finished at {} ===\n", finished.to_rfc3339()),
        );

        self.status.update(|r| {
            r.last_update = Some(finished);
            if report.harvest.is_success() {
                r.last_scrape = Some(finished);
            }
            if report.extract.is_success() {
                r.last_parse = Some(finished);
            }
            if report.is_success() {
                r.status = CycleStatus::Idle;
                r.message = Some("Update completed".to_string());
            } else {
                r.set_error(&report.error_message(), finished);
                r.message = Some("Update failed".to_string());
            }
        })?;

        Ok(report)
    }

    /// Runs only the harvest stage, output on the terminal
    pub async fn run_harvest_only(&self) -> Result<StageOutcome> {
        self.run_single(&self.harvest, self.harvest_timeout, CycleStatus::Scraping)
            .await
    }

    /// Runs only the extraction stage, output on the terminal
    pub async fn run_extract_only(&self) -> Result<StageOutcome> {
        self.run_single(&self.extract, self.extract_timeout, CycleStatus::Parsing)
            .await
    }

    async fn run_single(
        &self,
        command: &StageCommand,
        timeout: Duration,
        running: CycleStatus,
    ) -> Result<StageOutcome> {
        self.status.update(|r| r.status = running)?;

        let report = run_stage(command, timeout, &StageOutput::Inherit).await;
        let now = Utc::now();

        self.status.update(|r| {
            if report.outcome.is_success() {
                r.status = CycleStatus::Idle;
                match running {
                    CycleStatus::Scraping => r.last_scrape = Some(now),
                    _ => r.last_parse = Some(now),
                }
            } else {
                r.set_error(&format!("{} {}", command, report.outcome), now);
            }
        })?;

        Ok(report.outcome)
    }

    /// Creates `update_YYYYmmdd_HHMMSS.log` and points `update_latest.log` at it
    fn open_cycle_log(&self) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.logs_dir)?;

        let name = format!("update_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.logs_dir.join(&name);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        if let Err(e) = point_latest(&self.logs_dir, &name) {
            tracing::debug!("Cannot update {}: {}", LATEST_LOG, e);
        }

        Ok(path)
    }
}

fn append_log(path: &Path, text: &str) {
    let written = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(text.as_bytes()));
    if let Err(e) = written {
        tracing::warn!("Cannot write cycle log {}: {}", path.display(), e);
    }
}

#[cfg(unix)]
fn point_latest(logs_dir: &Path, name: &str) -> std::io::Result<()> {
    let latest = logs_dir.join(LATEST_LOG);
    match std::fs::remove_file(&latest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(name, latest)
}

#[cfg(not(unix))]
fn point_latest(logs_dir: &Path, name: &str) -> std::io::Result<()> {
    std::fs::write(logs_dir.join(LATEST_LOG), format!("{}\n", name))
}
