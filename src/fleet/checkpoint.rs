//! Resumable record of a fleet pass

use crate::registry::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Running,
    Interrupted,
    Completed,
}

/// Which targets a fleet pass has finished
///
/// `completed_groups` and `failed_groups` only grow and never hold
/// duplicates. A failed target that completes on a later pass is listed in
/// both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_groups: Vec<String>,
    pub failed_groups: Vec<String>,
    pub current_group: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PassStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Fresh checkpoint for a pass starting now
    pub fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            status: Some(PassStatus::Running),
            ..Self::default()
        }
    }

    /// Loads the checkpoint at `path`
    ///
    /// A missing or unreadable checkpoint starts over; it is never fatal.
    pub fn load(path: &Path) -> Self {
        match read_json::<Checkpoint>(path) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Stamps `last_updated` and writes atomically
    pub fn save(&mut self, path: &Path) -> io::Result<()> {
        self.last_updated = Some(Utc::now());
        write_json_atomic(path, self)
    }

    /// Marks a loaded checkpoint as running again, keeping both lists
    pub fn resume(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = Some(PassStatus::Running);
        self.completed_at = None;
    }

    pub fn record_completed(&mut self, target: &str) {
        if !self.completed_groups.iter().any(|t| t == target) {
            self.completed_groups.push(target.to_string());
        }
    }

    pub fn record_failed(&mut self, target: &str) {
        if !self.failed_groups.iter().any(|t| t == target) {
            self.failed_groups.push(target.to_string());
        }
    }

    pub fn mark_completed(&mut self) {
        self.current_group = None;
        self.status = Some(PassStatus::Completed);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_interrupted(&mut self) {
        self.status = Some(PassStatus::Interrupted);
    }
}

/// Targets still to process: `active` minus completed, in `active` order
pub fn resume_set(active: &[String], checkpoint: &Checkpoint) -> Vec<String> {
    let completed: HashSet<&str> = checkpoint
        .completed_groups
        .iter()
        .map(String::as_str)
        .collect();

    active
        .iter()
        .filter(|name| !completed.contains(name.as_str()))
        .cloned()
        .collect()
}
