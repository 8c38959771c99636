//! Scheduler status file
//!
//! External tools poll this file to see what the scheduler is doing. Every
//! write is a read-modify-write so fields a caller does not touch, such as
//! the last successful scrape, survive across cycles.

use crate::registry::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const ERROR_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    #[default]
    NeverRun,
    Idle,
    Updating,
    Scraping,
    Parsing,
    Error,
    Stopped,
    /// The status file exists but cannot be decoded
    Unknown,
}

impl CycleStatus {
    /// A cycle or stage is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Updating | Self::Scraping | Self::Parsing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    pub status: CycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scrape: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_parse: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl StatusRecord {
    /// Records an error, truncated to 500 characters
    pub fn set_error(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = CycleStatus::Error;
        self.last_error = Some(error.chars().take(ERROR_MESSAGE_CHARS).collect());
        self.last_error_time = Some(now);
    }
}

/// Handle on the status file
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status; `NeverRun` when the file does not exist
    pub fn read(&self) -> StatusRecord {
        match read_json::<StatusRecord>(&self.path) {
            Ok(Some(record)) => record,
            Ok(None) => StatusRecord {
                message: Some("Scheduler has never run".to_string()),
                ..StatusRecord::default()
            },
            Err(e) => {
                tracing::warn!("Unreadable scheduler status {}: {}", self.path.display(), e);
                StatusRecord {
                    status: CycleStatus::Unknown,
                    message: Some("Could not read scheduler status".to_string()),
                    ..StatusRecord::default()
                }
            }
        }
    }

    /// Applies `change` to the stored record and writes it back
    ///
    /// `updated_at` is stamped on every write. An unreadable file is
    /// replaced rather than failing the write.
    pub fn update<F>(&self, change: F) -> io::Result<StatusRecord>
    where
        F: FnOnce(&mut StatusRecord),
    {
        let mut record = match read_json::<StatusRecord>(&self.path) {
            Ok(Some(record)) => record,
            Ok(None) => StatusRecord::default(),
            Err(e) => {
                tracing::warn!("Replacing unreadable scheduler status: {}", e);
                StatusRecord::default()
            }
        };

        change(&mut record);
        record.updated_at = Some(Utc::now());
        write_json_atomic(&self.path, &record)?;
        Ok(record)
    }

    /// Like `update`, but a failed write is only logged
    pub fn update_logged<F>(&self, change: F)
    where
        F: FnOnce(&mut StatusRecord),
    {
        if let Err(e) = self.update(change) {
            tracing::error!("Failed to update status file {}: {}", self.path.display(), e);
        }
    }
}
