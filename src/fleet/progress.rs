//! Progress file for external monitoring of a fleet pass

use crate::registry::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scraping,
    Parsing,
    Idle,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_groups: usize,
    pub completed: usize,
    pub current_group: Option<String>,
    pub status: Phase,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    /// Snapshot of the pass; `percentage` is rounded to one decimal
    pub fn new(total: usize, completed: usize, current: Option<&str>, status: Phase) -> Self {
        Self {
            total_groups: total,
            completed,
            current_group: current.map(str::to_string),
            status,
            percentage: percentage(completed, total),
            eta_seconds: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_eta(mut self, eta: Option<Duration>) -> Self {
        self.eta_seconds = eta.map(|d| d.as_secs());
        self
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        read_json(path)
    }
}

fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((completed as f64 / total as f64) * 1000.0).round() / 10.0
}

/// Mean time per processed target times the targets left
///
/// # Returns
///
/// `None` before the first target finishes
pub fn estimate_remaining(elapsed: Duration, processed: usize, remaining: usize) -> Option<Duration> {
    if processed == 0 {
        return None;
    }
    let per_target = elapsed / processed as u32;
    Some(per_target * remaining as u32)
}
