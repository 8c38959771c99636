//! Scheduler module: periodic harvest and extraction cycles
//!
//! This module provides:
//! - `StatusStore`: the status file external tools poll
//! - `CycleRunner`: one harvest + extraction cycle with a per-cycle log
//! - `Scheduler`: single-flight triggers, the periodic task and the daemon loop

mod cycle;
mod status;
mod trigger;

pub use cycle::{CycleReport, CycleRunner};
pub use status::{CycleStatus, StatusRecord, StatusStore};
pub use trigger::{last_scrape_time, print_status, should_run, Scheduler, Triggered};
