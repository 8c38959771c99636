//! Leakwatch main entry point
//!
//! This is the command-line interface for the Leakwatch harvesting engine.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use leakwatch::config::{resolve_config, Config};
use leakwatch::fleet::{print_status as print_fleet_status, FleetMode, FleetOrchestrator};
use leakwatch::harvest::print_summary;
use leakwatch::scheduler::{print_status as print_scheduler_status, CycleRunner, Scheduler, Triggered};
use leakwatch::supervise::StageCommand;
use leakwatch::{HarvestError, HarvestOptions, Harvester};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Leakwatch: leak-site harvesting and orchestration
///
/// Leakwatch fetches snapshots of leak sites over Tor, tracks endpoint
/// availability in a shared registry, and drives the extraction stage
/// through resumable fleet passes and periodic update cycles.
#[derive(Parser, Debug)]
#[command(name = "leakwatch")]
#[command(version = "1.0.0")]
#[command(about = "Leak-site harvesting and orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch snapshots of registry endpoints
    Harvest(HarvestArgs),

    /// Harvest and extract every active target, resumably
    Fleet(FleetArgs),

    /// Run update cycles (harvest then extraction)
    Schedule(ScheduleArgs),
}

#[derive(Args, Debug)]
struct HarvestArgs {
    /// Only harvest this target
    #[arg(short = 'G', long = "group", value_name = "NAME")]
    group: Option<String>,

    /// Remove a leftover run lock before starting
    #[arg(short = 'F', long)]
    force: bool,

    /// Also fetch endpoints that are disabled
    #[arg(short = 'B', long)]
    bypass: bool,

    /// Log per-endpoint detail
    #[arg(short = 'V', long = "verbose")]
    harvest_verbose: bool,
}

#[derive(Args, Debug)]
struct FleetArgs {
    /// Discard the checkpoint and start over
    #[arg(long, conflicts_with_all = ["resume", "status"])]
    reset: bool,

    /// Continue from the checkpoint (default)
    #[arg(long, conflicts_with_all = ["reset", "status"])]
    resume: bool,

    /// Show checkpoint and progress and exit
    #[arg(long, conflicts_with_all = ["reset", "resume"])]
    status: bool,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    #[command(flatten)]
    mode: ScheduleMode,

    /// Override the daemon interval (hours)
    #[arg(long, value_name = "HOURS")]
    interval: Option<u64>,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct ScheduleMode {
    /// Run a single cycle and exit (default)
    #[arg(long)]
    once: bool,

    /// Run cycles whenever the interval has passed since the last scrape
    #[arg(long)]
    daemon: bool,

    /// Run a cycle every `periodic-interval-minutes`
    #[arg(long)]
    periodic: bool,

    /// Run only the harvest stage
    #[arg(long)]
    scrape: bool,

    /// Run only the extraction stage
    #[arg(long)]
    parse: bool,

    /// Show the scheduler status and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let extra = match &cli.command {
        Command::Harvest(args) if args.harvest_verbose => 1,
        _ => 0,
    };
    setup_logging(cli.verbose.saturating_add(extra), cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (config, hash) =
        resolve_config(cli.config.as_deref()).context("Failed to load configuration")?;
    match (&cli.config, hash) {
        (Some(path), Some(hash)) => tracing::info!(
            "Configuration loaded from {} (hash: {})",
            path.display(),
            hash
        ),
        _ => tracing::info!("Using default configuration"),
    }

    match cli.command {
        Command::Harvest(args) => handle_harvest(config, args).await,
        Command::Fleet(args) => handle_fleet(config, cli.config.as_deref(), args).await,
        Command::Schedule(args) => handle_schedule(config, cli.config.as_deref(), args).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("leakwatch=info,warn"),
            1 => EnvFilter::new("leakwatch=debug,info"),
            2 => EnvFilter::new("leakwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Base command that re-invokes this binary's `harvest` subcommand
fn self_harvest_command(config_path: Option<&Path>) -> anyhow::Result<StageCommand> {
    let exe = std::env::current_exe().context("Cannot locate the leakwatch executable")?;
    let mut args = Vec::new();
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    args.push("harvest".to_string());
    Ok(StageCommand::new(exe, args))
}

/// Handles `harvest`: one pass over the registry
async fn handle_harvest(config: Config, args: HarvestArgs) -> anyhow::Result<ExitCode> {
    let options = HarvestOptions {
        target: args.group,
        force: args.force,
        bypass_enabled: args.bypass,
    };

    match &options.target {
        Some(target) => tracing::info!("Harvesting target {}", target),
        None => tracing::info!("Harvesting all targets"),
    }

    let harvester = Harvester::new(config)?;
    match harvester.run(&options).await {
        Ok(stats) => {
            print_summary(&stats);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ HarvestError::LockContention { .. }) => {
            tracing::error!("{}; use --force to clear a leftover lock", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("Harvest failed"),
    }
}

/// Handles `fleet`: the checkpointed per-target pass
async fn handle_fleet(
    config: Config,
    config_path: Option<&Path>,
    args: FleetArgs,
) -> anyhow::Result<ExitCode> {
    if args.status {
        print_fleet_status(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if args.reset {
        FleetMode::Reset
    } else {
        FleetMode::Resume
    };

    let orchestrator = FleetOrchestrator::new(&config, self_harvest_command(config_path)?)?;
    let summary = orchestrator.run(mode).await.context("Fleet pass failed")?;

    println!("=== Fleet Summary ===\n");
    println!("Active targets: {}", summary.active);
    println!("Processed this run: {}", summary.processed);
    println!("Completed: {}", summary.completed.len());
    println!("Failed: {}", summary.failed.len());
    if !summary.failed.is_empty() {
        println!("  {}", summary.failed.join(", "));
    }

    if summary.interrupted {
        println!("\nInterrupted; run again to resume.");
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `schedule`: one cycle, a stage, the periodic task or the daemon
async fn handle_schedule(
    mut config: Config,
    config_path: Option<&Path>,
    args: ScheduleArgs,
) -> anyhow::Result<ExitCode> {
    if let Some(hours) = args.interval {
        anyhow::ensure!(hours >= 1, "--interval must be at least 1 hour");
        config.scheduler.interval_hours = hours;
    }

    let mode = args.mode;
    let runner = CycleRunner::new(&config, self_harvest_command(config_path)?)?;

    if mode.status {
        let data_files = [config.paths.victims_file(), config.paths.registry_file()];
        print_scheduler_status(&runner.status().read(), &data_files);
        return Ok(ExitCode::SUCCESS);
    }

    let scheduler = Scheduler::new(runner);

    if mode.scrape || mode.parse {
        let triggered = if mode.scrape {
            scheduler.trigger_harvest().await?
        } else {
            scheduler.trigger_extract().await?
        };
        return Ok(match triggered {
            Triggered::Ran(outcome) if outcome.is_success() => ExitCode::SUCCESS,
            Triggered::Ran(outcome) => {
                tracing::error!("Stage {}", outcome);
                ExitCode::FAILURE
            }
            Triggered::AlreadyRunning => ExitCode::FAILURE,
        });
    }

    if mode.daemon {
        scheduler
            .run_daemon(
                config.scheduler.interval(),
                Duration::from_secs(config.scheduler.poll_interval_secs),
                &config.paths.victims_file(),
                leakwatch::shutdown::signal_received(),
            )
            .await?;
        return Ok(ExitCode::SUCCESS);
    }

    if mode.periodic {
        let handle = scheduler.spawn_periodic(
            config.scheduler.periodic_interval(),
            Duration::from_secs(config.scheduler.initial_delay_secs),
        );
        leakwatch::shutdown::signal_received().await;
        handle.abort();
        scheduler
            .runner()
            .status()
            .update_logged(|r| r.status = leakwatch::scheduler::CycleStatus::Stopped);
        return Ok(ExitCode::SUCCESS);
    }

    match scheduler.trigger().await? {
        Triggered::Ran(report) => {
            println!("Log: {}", report.log_file.display());
            println!("Harvest: {}", report.harvest);
            println!("Extraction: {}", report.extract);
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Triggered::AlreadyRunning => Ok(ExitCode::FAILURE),
    }
}
