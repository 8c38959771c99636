//! Harvest run statistics
//!
//! Counts endpoint outcomes during a run and prints the end-of-run summary.

use crate::harvest::protection::ProtectionKind;
use std::collections::HashMap;

/// Terminal status of one endpoint in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointStatus {
    Success,
    Protection(ProtectionKind),
    Timeout,
    Error,
    /// Artifact was fresh; nothing fetched
    Skipped,
}

/// Run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestStats {
    /// Endpoints considered (fetched or skipped)
    pub total: u64,
    pub success: u64,
    pub protection: u64,
    pub timeout: u64,
    pub error: u64,
    pub skipped: u64,

    /// Endpoints switched off by the offline-disable policy this run
    pub disabled: u64,

    pub protection_by_kind: HashMap<ProtectionKind, u64>,
}

impl HarvestStats {
    pub fn record(&mut self, status: EndpointStatus) {
        self.total += 1;
        match status {
            EndpointStatus::Success => self.success += 1,
            EndpointStatus::Protection(kind) => {
                self.protection += 1;
                *self.protection_by_kind.entry(kind).or_insert(0) += 1;
            }
            EndpointStatus::Timeout => self.timeout += 1,
            EndpointStatus::Error => self.error += 1,
            EndpointStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn record_disabled(&mut self) {
        self.disabled += 1;
    }

    /// Endpoints that were actually fetched
    pub fn fetched(&self) -> u64 {
        self.total - self.skipped
    }

    /// Share of fetched endpoints that returned genuine content
    pub fn success_rate(&self) -> f64 {
        let fetched = self.fetched();
        if fetched == 0 {
            0.0
        } else {
            (self.success as f64 / fetched as f64) * 100.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_summary(stats: &HarvestStats) {
    println!("=== Harvest Summary ===\n");

    println!("Endpoints:");
    println!("  Considered: {}", stats.total);
    println!("  Skipped (fresh): {}", stats.skipped);
    println!("  Fetched: {}", stats.fetched());
    println!();

    println!("Outcomes:");
    println!("  Success: {}", stats.success);
    println!("  Protection: {}", stats.protection);
    println!("  Timeout: {}", stats.timeout);
    println!("  Error: {}", stats.error);
    println!();

    if !stats.protection_by_kind.is_empty() {
        println!("Protection by Kind:");
        let mut kinds: Vec<_> = stats.protection_by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1));
        for (kind, count) in kinds {
            println!("  {}: {}", kind, count);
        }
        println!();
    }

    if stats.disabled > 0 {
        println!("Disabled (offline too long): {}", stats.disabled);
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} endpoints fetched)",
        stats.success_rate(),
        stats.success,
        stats.fetched()
    );
}
