//! Fleet pass: harvest then extract every active target, one at a time

use crate::config::Config;
use crate::fleet::checkpoint::{resume_set, Checkpoint};
use crate::fleet::progress::{estimate_remaining, Phase, Progress};
use crate::registry::Registry;
use crate::supervise::{run_stage, StageCommand, StageOutput, StageReport};
use crate::Result;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How to treat an existing checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FleetMode {
    /// Skip targets the checkpoint lists as completed
    #[default]
    Resume,

    /// Discard the checkpoint and start over
    Reset,
}

/// Result of one fleet pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSummary {
    pub active: usize,
    pub processed: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub interrupted: bool,
}

/// Sequential per-target driver of the harvest and extraction stages
pub struct FleetOrchestrator {
    registry_path: PathBuf,
    checkpoint_path: PathBuf,
    progress_path: PathBuf,
    harvest: StageCommand,
    extract: StageCommand,
    extract_flag: String,
    harvest_timeout: Duration,
    extract_timeout: Duration,
    delay: Duration,
}

impl FleetOrchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `config` - Paths, timeouts and the extraction command
    /// * `harvest` - Base harvest command; `--group <name> --verbose` is appended per target
    pub fn new(config: &Config, harvest: StageCommand) -> Result<Self> {
        let extract = StageCommand::from_argv(&config.extract.command)
            .ok_or_else(|| {
                crate::ConfigError::Validation("extract.command cannot be empty".to_string())
            })?
            .in_dir(config.extract.working_dir.clone());

        Ok(Self {
            registry_path: config.paths.registry_file(),
            checkpoint_path: config.paths.checkpoint_file(),
            progress_path: config.paths.progress_file(),
            harvest,
            extract,
            extract_flag: config.extract.target_flag.clone(),
            harvest_timeout: Duration::from_secs(config.fleet.harvest_timeout_secs),
            extract_timeout: Duration::from_secs(config.fleet.extract_timeout_secs),
            delay: Duration::from_secs(config.fleet.inter_target_delay_secs),
        })
    }

    fn harvest_command(&self, target: &str) -> StageCommand {
        self.harvest.with_args(["--group", target, "--verbose"])
    }

    fn extract_command(&self, target: &str) -> StageCommand {
        self.extract.with_args([self.extract_flag.as_str(), target])
    }

    /// Runs a pass until done or until SIGINT/SIGTERM
    pub async fn run(&self, mode: FleetMode) -> Result<FleetSummary> {
        self.run_until(mode, crate::shutdown::signal_received()).await
    }

    /// Runs a pass until done or until `shutdown` resolves
    ///
    /// On shutdown the running stage is killed, the checkpoint and progress
    /// are marked interrupted, and the summary has `interrupted` set.
    pub async fn run_until<F>(&self, mode: FleetMode, shutdown: F) -> Result<FleetSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut checkpoint = match mode {
            FleetMode::Reset => {
                tracing::info!("Starting fresh fleet pass (checkpoint reset)");
                Checkpoint::start()
            }
            FleetMode::Resume => {
                let mut checkpoint = Checkpoint::load(&self.checkpoint_path);
                if checkpoint.completed_groups.is_empty() && checkpoint.failed_groups.is_empty() {
                    tracing::info!("Starting new fleet pass");
                } else {
                    tracing::info!(
                        "Resuming fleet pass, {} target(s) completed, {} failed",
                        checkpoint.completed_groups.len(),
                        checkpoint.failed_groups.len()
                    );
                }
                checkpoint.resume();
                checkpoint
            }
        };

        let active = Registry::load(&self.registry_path)?.active_targets();
        let mut summary = FleetSummary {
            active: active.len(),
            ..FleetSummary::default()
        };

        if active.is_empty() {
            tracing::error!("No active targets in {}", self.registry_path.display());
            return Ok(summary);
        }

        let remaining = resume_set(&active, &checkpoint);
        tracing::info!(
            "{} active target(s), {} to process",
            active.len(),
            remaining.len()
        );

        if remaining.is_empty() {
            tracing::info!("All targets already completed");
            return Ok(summary);
        }

        let total = active.len();
        let already_done = total - remaining.len();
        let start = Instant::now();

        for (i, target) in remaining.iter().enumerate() {
            let position = already_done + i + 1;
            tracing::info!("Processing [{}/{}]: {}", position, total, target);

            checkpoint.current_group = Some(target.clone());
            checkpoint.save(&self.checkpoint_path)?;
            Progress::new(total, position - 1, Some(target), Phase::Scraping)
                .save(&self.progress_path)?;

            let ok = tokio::select! {
                ok = self.process_target(target, total, position) => ok,
                _ = &mut shutdown => {
                    self.interrupt(&mut checkpoint, total, Some(target))?;
                    summary.interrupted = true;
                    return Ok(summary);
                }
            };

            if ok {
                checkpoint.record_completed(target);
                summary.completed.push(target.clone());
            } else {
                checkpoint.record_failed(target);
                summary.failed.push(target.clone());
            }
            summary.processed += 1;

            checkpoint.current_group = None;
            checkpoint.save(&self.checkpoint_path)?;

            let left = remaining.len() - (i + 1);
            let eta = estimate_remaining(start.elapsed(), i + 1, left);
            Progress::new(total, checkpoint.completed_groups.len(), None, Phase::Idle)
                .with_eta(eta)
                .save(&self.progress_path)?;

            tracing::info!(
                "Progress: {}/{} ({:.1}%), ETA ~{:.1}h ({} remaining)",
                position,
                total,
                position as f64 / total as f64 * 100.0,
                eta.unwrap_or_default().as_secs_f64() / 3600.0,
                left
            );

            if left > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = &mut shutdown => {
                        self.interrupt(&mut checkpoint, total, None)?;
                        summary.interrupted = true;
                        return Ok(summary);
                    }
                }
            }
        }

        tracing::info!(
            "Fleet pass completed: {} completed, {} failed in {:.2}h",
            checkpoint.completed_groups.len(),
            checkpoint.failed_groups.len(),
            start.elapsed().as_secs_f64() / 3600.0
        );
        if !checkpoint.failed_groups.is_empty() {
            tracing::info!("Failed targets: {}", checkpoint.failed_groups.join(", "));
        }

        checkpoint.mark_completed();
        checkpoint.save(&self.checkpoint_path)?;
        Progress::new(total, checkpoint.completed_groups.len(), None, Phase::Completed)
            .save(&self.progress_path)?;

        Ok(summary)
    }

    /// Harvest then extract one target
    ///
    /// # Returns
    ///
    /// `true` if either stage ran to completion, whatever its exit code
    async fn process_target(&self, target: &str, total: usize, position: usize) -> bool {
        let harvest = run_stage(
            &self.harvest_command(target),
            self.harvest_timeout,
            &StageOutput::Capture,
        )
        .await;
        log_stage(target, "Harvest", &harvest);

        // Extraction runs even after a failed harvest; earlier artifacts may exist
        if let Err(e) = Progress::new(total, position - 1, Some(target), Phase::Parsing)
            .save(&self.progress_path)
        {
            tracing::warn!("Failed to write progress: {}", e);
        }

        let extract = run_stage(
            &self.extract_command(target),
            self.extract_timeout,
            &StageOutput::Capture,
        )
        .await;
        log_stage(target, "Extraction", &extract);

        harvest.outcome.ran_to_completion() || extract.outcome.ran_to_completion()
    }

    fn interrupt(
        &self,
        checkpoint: &mut Checkpoint,
        total: usize,
        current: Option<&str>,
    ) -> Result<()> {
        tracing::warn!("Fleet pass interrupted");
        checkpoint.mark_interrupted();
        checkpoint.save(&self.checkpoint_path)?;
        Progress::new(total, checkpoint.completed_groups.len(), current, Phase::Interrupted)
            .save(&self.progress_path)?;
        Ok(())
    }
}

fn log_stage(target: &str, stage: &str, report: &StageReport) {
    if report.outcome.is_success() {
        tracing::info!(
            "{} completed for {} in {:.1}s",
            stage,
            target,
            report.elapsed.as_secs_f64()
        );
    } else if report.outcome.ran_to_completion() {
        tracing::warn!("{} for {} {}", stage, target, report.outcome);
    } else {
        tracing::error!("{} for {} {}", stage, target, report.outcome);
    }

    if !report.stderr_tail.is_empty() {
        tracing::debug!("{} stderr for {}: {}", stage, target, report.stderr_tail);
    }
}

/// Prints checkpoint and progress for `fleet --status`
pub fn print_status(config: &Config) -> Result<()> {
    let checkpoint = Checkpoint::load(&config.paths.checkpoint_file());
    let active = Registry::load(&config.paths.registry_file())?.active_targets();
    let remaining = resume_set(&active, &checkpoint);
    let never = || "Never".to_string();

    println!("=== Fleet Status ===\n");
    println!("Active targets: {}", active.len());
    println!("Completed: {}", checkpoint.completed_groups.len());
    println!("Failed: {}", checkpoint.failed_groups.len());
    println!(
        "Current: {}",
        checkpoint.current_group.as_deref().unwrap_or("None")
    );
    println!(
        "Last updated: {}",
        checkpoint.last_updated.map(|t| t.to_rfc3339()).unwrap_or_else(never)
    );
    if let Some(started) = checkpoint.started_at {
        println!("Started: {}", started.to_rfc3339());
    }
    if let Some(status) = checkpoint.status {
        println!("Pass status: {:?}", status);
    }
    println!("Remaining: {}", remaining.len());

    match Progress::load(&config.paths.progress_file()) {
        Ok(Some(progress)) => {
            println!();
            println!("Progress: {}%", progress.percentage);
            println!("Phase: {:?}", progress.status);
            if let Some(eta) = progress.eta_seconds {
                println!("ETA: ~{:.1}h", eta as f64 / 3600.0);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Unreadable progress file: {}", e),
    }

    Ok(())
}
