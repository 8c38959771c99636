//! Child process supervision
//!
//! Harvest and extraction stages run as separate processes so a wedged
//! browser or parser cannot take the orchestrator down with it. Every stage
//! runs under a wall-clock timeout and is killed when the timeout fires or
//! when the supervising future is dropped.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const STDERR_TAIL_CHARS: usize = 500;

/// Program plus arguments for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl StageCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Builds a command from `[program, args...]`; `None` when empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program, args.to_vec()))
    }

    pub fn in_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Copy of this command with extra trailing arguments
    pub fn with_args<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = self.clone();
        command.args.extend(extra.into_iter().map(Into::into));
        command
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Where a stage's output goes
#[derive(Debug, Clone)]
pub enum StageOutput {
    /// Discard stdout, keep the tail of stderr for diagnostics
    Capture,

    /// Share the supervisor's terminal
    Inherit,

    /// Append stdout and stderr to a log file
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    SpawnFailed(String),
}

impl StageOutcome {
    /// Exit status 0
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The process ran and exited on its own, whatever the code
    pub fn ran_to_completion(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { code: Some(code) } => write!(f, "exited with code {}", code),
            Self::Failed { code: None } => write!(f, "terminated by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::SpawnFailed(e) => write!(f, "failed to start: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub outcome: StageOutcome,
    pub elapsed: Duration,
    pub stderr_tail: String,
}

/// Runs `command` to completion or until `timeout`
///
/// # Arguments
///
/// * `command` - Stage to run
/// * `timeout` - Wall-clock limit; the child is killed when it elapses
/// * `output` - Output routing
///
/// # Returns
///
/// A report with the outcome and elapsed time; never an error
pub async fn run_stage(command: &StageCommand, timeout: Duration, output: &StageOutput) -> StageReport {
    let start = Instant::now();
    let report = |outcome, stderr_tail| StageReport {
        outcome,
        elapsed: start.elapsed(),
        stderr_tail,
    };

    let mut cmd = command.to_command();
    cmd.kill_on_drop(true).stdin(Stdio::null());

    if let Err(e) = route_output(&mut cmd, output) {
        return report(
            StageOutcome::SpawnFailed(format!("cannot open stage log: {}", e)),
            String::new(),
        );
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return report(StageOutcome::SpawnFailed(e.to_string()), String::new()),
    };

    tracing::debug!("Started stage: {}", command);

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            tracing::warn!("Stage timed out after {}s: {}", timeout.as_secs(), command);
            report(StageOutcome::TimedOut, String::new())
        }
        Ok(Err(e)) => report(StageOutcome::Failed { code: None }, e.to_string()),
        Ok(Ok(out)) => {
            let outcome = if out.status.success() {
                StageOutcome::Succeeded
            } else {
                StageOutcome::Failed {
                    code: out.status.code(),
                }
            };
            report(outcome, tail(&String::from_utf8_lossy(&out.stderr)))
        }
    }
}

fn route_output(cmd: &mut Command, output: &StageOutput) -> std::io::Result<()> {
    match output {
        StageOutput::Capture => {
            cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        }
        StageOutput::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        StageOutput::File(path) => {
            let file = open_append(path)?;
            cmd.stdout(Stdio::from(file.try_clone()?))
                .stderr(Stdio::from(file));
        }
    }
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Last characters of a stage's stderr
pub fn tail(text: &str) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    trimmed
        .chars()
        .skip(count.saturating_sub(STDERR_TAIL_CHARS))
        .collect()
}
