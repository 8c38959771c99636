//! Integration tests for the fleet orchestrator and the update scheduler
//!
//! Stages are stand-in `sh` scripts that append the target they were given
//! to a calls file, so tests can see exactly which stages ran.

#![cfg(unix)]

use leakwatch::config::Config;
use leakwatch::fleet::{Checkpoint, FleetMode, FleetOrchestrator, PassStatus, Phase, Progress};
use leakwatch::scheduler::{CycleRunner, CycleStatus, Scheduler, Triggered};
use leakwatch::supervise::{StageCommand, StageOutcome};
use leakwatch::{Endpoint, Registry, Target};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// `sh -c <script> <name>`; appended arguments land in `$1`, `$2`, ...
fn script(script: &str, name: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        name.to_string(),
    ]
}

/// Stage that records its target argument (`$2`) in `log`
fn recorder(log: &Path, name: &str) -> Vec<String> {
    script(&format!("echo \"$2\" >> '{}'", log.display()), name)
}

fn stage(argv: Vec<String>) -> StageCommand {
    StageCommand::from_argv(&argv).unwrap()
}

fn create_test_config(home: &Path, extract: Vec<String>) -> Config {
    let mut config = Config::default();
    config.paths.home = home.to_path_buf();
    config.extract.command = extract;
    config.fleet.inter_target_delay_secs = 0;
    config.fleet.harvest_timeout_secs = 10;
    config.fleet.extract_timeout_secs = 10;
    config.scheduler.harvest_timeout_secs = 10;
    config.scheduler.extract_timeout_secs = 10;
    config
}

fn write_active_registry(config: &Config, names: &[&str]) {
    let targets = names
        .iter()
        .map(|name| {
            let mut endpoint = Endpoint::new(format!("http://{}.onion/", name.to_lowercase()));
            endpoint.available = true;
            Target::new(*name, vec![endpoint])
        })
        .collect();
    Registry::new(targets)
        .unwrap()
        .save(&config.paths.registry_file())
        .unwrap();
}

fn calls(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    harvest_log: PathBuf,
    extract_log: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let harvest_log = dir.path().join("harvest_calls.txt");
    let extract_log = dir.path().join("extract_calls.txt");
    let config = create_test_config(dir.path(), recorder(&extract_log, "extract"));
    Fixture {
        _dir: dir,
        config,
        harvest_log,
        extract_log,
    }
}

#[tokio::test]
async fn test_fleet_resume_processes_only_remaining_targets() {
    let fx = fixture();
    write_active_registry(&fx.config, &["A", "B", "C"]);

    let mut checkpoint = Checkpoint::start();
    checkpoint.record_completed("A");
    checkpoint.record_completed("B");
    checkpoint.save(&fx.config.paths.checkpoint_file()).unwrap();

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(recorder(&fx.harvest_log, "harvest"))).unwrap();
    let summary = orchestrator
        .run_until(FleetMode::Resume, std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.completed, vec!["C".to_string()]);
    assert!(summary.failed.is_empty());
    assert_eq!(calls(&fx.harvest_log), vec!["C"]);
    assert_eq!(calls(&fx.extract_log), vec!["C"]);

    let checkpoint = Checkpoint::load(&fx.config.paths.checkpoint_file());
    assert_eq!(checkpoint.completed_groups, vec!["A", "B", "C"]);
    assert_eq!(checkpoint.status, Some(PassStatus::Completed));
    assert!(checkpoint.current_group.is_none());
    assert!(checkpoint.completed_at.is_some());

    let progress = Progress::load(&fx.config.paths.progress_file()).unwrap().unwrap();
    assert_eq!(progress.status, Phase::Completed);
    assert_eq!(progress.percentage, 100.0);
}

#[tokio::test]
async fn test_fleet_resume_keeps_failed_targets() {
    let fx = fixture();
    write_active_registry(&fx.config, &["A", "B"]);

    let started = chrono::Utc::now() - chrono::Duration::hours(1);
    let mut checkpoint = Checkpoint {
        started_at: Some(started),
        failed_groups: vec!["A".to_string()],
        current_group: Some("B".to_string()),
        status: Some(PassStatus::Interrupted),
        ..Checkpoint::default()
    };
    checkpoint.save(&fx.config.paths.checkpoint_file()).unwrap();

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(recorder(&fx.harvest_log, "harvest"))).unwrap();
    orchestrator
        .run_until(FleetMode::Resume, std::future::pending())
        .await
        .unwrap();

    // Failed targets are retried but stay listed as failed
    assert_eq!(calls(&fx.harvest_log), vec!["A", "B"]);
    let checkpoint = Checkpoint::load(&fx.config.paths.checkpoint_file());
    assert_eq!(checkpoint.failed_groups, vec!["A"]);
    assert_eq!(checkpoint.completed_groups, vec!["A", "B"]);
    assert_eq!(checkpoint.started_at, Some(started));
    assert_eq!(checkpoint.status, Some(PassStatus::Completed));
}

#[tokio::test]
async fn test_fleet_reset_ignores_checkpoint() {
    let fx = fixture();
    write_active_registry(&fx.config, &["A", "B"]);

    let mut checkpoint = Checkpoint::start();
    checkpoint.record_completed("A");
    checkpoint.save(&fx.config.paths.checkpoint_file()).unwrap();

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(recorder(&fx.harvest_log, "harvest"))).unwrap();
    orchestrator
        .run_until(FleetMode::Reset, std::future::pending())
        .await
        .unwrap();

    assert_eq!(calls(&fx.harvest_log), vec!["A", "B"]);
}

#[tokio::test]
async fn test_fleet_skips_inactive_targets() {
    let fx = fixture();
    let mut offline = Endpoint::new("http://offline.onion/");
    offline.available = false;
    let mut online = Endpoint::new("http://online.onion/");
    online.available = true;
    Registry::new(vec![
        Target::new("offline", vec![offline]),
        Target::new("online", vec![online]),
    ])
    .unwrap()
    .save(&fx.config.paths.registry_file())
    .unwrap();

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(recorder(&fx.harvest_log, "harvest"))).unwrap();
    let summary = orchestrator
        .run_until(FleetMode::Reset, std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.active, 1);
    assert_eq!(calls(&fx.harvest_log), vec!["online"]);
}

#[tokio::test]
async fn test_fleet_extracts_after_harvest_timeout() {
    let mut fx = fixture();
    fx.config.fleet.harvest_timeout_secs = 1;
    write_active_registry(&fx.config, &["A"]);

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(script("sleep 30", "harvest"))).unwrap();
    let summary = orchestrator
        .run_until(FleetMode::Reset, std::future::pending())
        .await
        .unwrap();

    // Extraction ran to completion, so the target counts as completed
    assert_eq!(calls(&fx.extract_log), vec!["A"]);
    assert_eq!(summary.completed, vec!["A".to_string()]);
}

#[tokio::test]
async fn test_fleet_fails_target_when_no_stage_completes() {
    let mut fx = fixture();
    fx.config.fleet.harvest_timeout_secs = 1;
    fx.config.fleet.extract_timeout_secs = 1;
    fx.config.extract.command = script("sleep 30", "extract");
    write_active_registry(&fx.config, &["A"]);

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(script("sleep 30", "harvest"))).unwrap();
    let summary = orchestrator
        .run_until(FleetMode::Reset, std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.failed, vec!["A".to_string()]);
    let checkpoint = Checkpoint::load(&fx.config.paths.checkpoint_file());
    assert_eq!(checkpoint.failed_groups, vec!["A"]);
    assert!(checkpoint.completed_groups.is_empty());
}

#[tokio::test]
async fn test_fleet_interrupt_marks_checkpoint() {
    let fx = fixture();
    write_active_registry(&fx.config, &["A", "B"]);

    let orchestrator =
        FleetOrchestrator::new(&fx.config, stage(script("sleep 30", "harvest"))).unwrap();
    let summary = orchestrator
        .run_until(
            FleetMode::Reset,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.processed, 0);

    let checkpoint = Checkpoint::load(&fx.config.paths.checkpoint_file());
    assert_eq!(checkpoint.status, Some(PassStatus::Interrupted));
    assert!(checkpoint.completed_groups.is_empty());

    let progress = Progress::load(&fx.config.paths.progress_file()).unwrap().unwrap();
    assert_eq!(progress.status, Phase::Interrupted);

    // The next resume still has both targets to do
    let remaining = leakwatch::fleet::resume_set(&["A".to_string(), "B".to_string()], &checkpoint);
    assert_eq!(remaining.len(), 2);
}

fn scheduler(fx: &Fixture, harvest: Vec<String>) -> Scheduler {
    Scheduler::new(CycleRunner::new(&fx.config, stage(harvest)).unwrap())
}

#[tokio::test]
async fn test_status_is_never_run_before_first_cycle() {
    let fx = fixture();
    let scheduler = scheduler(&fx, script("true", "harvest"));
    assert_eq!(scheduler.runner().status().read().status, CycleStatus::NeverRun);
    assert!(!fx.config.paths.scheduler_status_file().exists());
}

#[tokio::test]
async fn test_cycle_extracts_after_harvest_timeout() {
    let mut fx = fixture();
    fx.config.scheduler.harvest_timeout_secs = 1;
    let scheduler = scheduler(&fx, script("sleep 30", "harvest"));

    let Triggered::Ran(report) = scheduler.trigger().await.unwrap() else {
        panic!("cycle did not run");
    };

    assert_eq!(report.harvest, StageOutcome::TimedOut);
    assert!(report.extract.is_success());
    assert!(!report.is_success());

    let status = scheduler.runner().status().read();
    assert_eq!(status.status, CycleStatus::Error);
    assert!(status.last_scrape.is_none());
    assert!(status.last_parse.is_some());
    assert!(status.last_update.is_some());
    assert!(status.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_trigger_is_single_flight() {
    let fx = fixture();
    let scheduler = scheduler(&fx, script("sleep 1", "harvest"));

    let (first, second) = tokio::join!(scheduler.trigger(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.trigger().await
    });

    assert!(matches!(first.unwrap(), Triggered::Ran(_)));
    assert!(second.unwrap().is_already_running());
    assert!(!scheduler.is_running());

    // The flag is released once the cycle finishes
    let third = scheduler.trigger().await.unwrap();
    assert!(matches!(third, Triggered::Ran(report) if report.is_success()));
}

#[tokio::test]
async fn test_stage_only_runs_share_the_guard() {
    let fx = fixture();
    let scheduler = scheduler(&fx, script("sleep 1", "harvest"));

    let (cycle, extract) = tokio::join!(scheduler.trigger(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.trigger_extract().await
    });

    assert!(matches!(cycle.unwrap(), Triggered::Ran(_)));
    assert!(extract.unwrap().is_already_running());
}

#[tokio::test]
async fn test_daemon_runs_due_cycle_then_stops() {
    let fx = fixture();
    let scheduler = scheduler(&fx, recorder(&fx.harvest_log, "harvest"));

    scheduler
        .run_daemon(
            Duration::from_secs(6 * 3600),
            Duration::from_secs(300),
            &fx.config.paths.victims_file(),
            tokio::time::sleep(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    // Full harvest gets no target argument
    assert_eq!(calls(&fx.harvest_log), vec![""]);

    let status = scheduler.runner().status().read();
    assert_eq!(status.status, CycleStatus::Stopped);
    assert!(status.last_scrape.is_some());
}

#[tokio::test]
async fn test_daemon_waits_when_recent_data_exists() {
    let fx = fixture();
    let victims = fx.config.paths.victims_file();
    std::fs::create_dir_all(victims.parent().unwrap()).unwrap();
    std::fs::write(&victims, "[]").unwrap();

    let scheduler = scheduler(&fx, recorder(&fx.harvest_log, "harvest"));
    scheduler
        .run_daemon(
            Duration::from_secs(6 * 3600),
            Duration::from_secs(300),
            &victims,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    assert!(calls(&fx.harvest_log).is_empty());
    assert_eq!(scheduler.runner().status().read().status, CycleStatus::Stopped);
}

#[tokio::test]
async fn test_periodic_trigger_runs_first_cycle_after_delay() {
    let fx = fixture();
    let scheduler = scheduler(&fx, recorder(&fx.harvest_log, "harvest"));

    let handle = scheduler.spawn_periodic(Duration::from_secs(3600), Duration::from_millis(100));

    let mut ran = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if scheduler.runner().status().read().status == CycleStatus::Idle {
            ran = true;
            break;
        }
    }
    handle.abort();

    assert!(ran);
    assert_eq!(calls(&fx.harvest_log).len(), 1);
}
