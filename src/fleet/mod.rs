//! Fleet module: checkpointed, resumable crawl of every active target
//!
//! Each active target is harvested and then extracted in its own child
//! processes. Progress survives restarts through a checkpoint file, and a
//! separate progress file lets external tools watch the pass.

mod checkpoint;
mod orchestrator;
mod progress;

pub use checkpoint::{resume_set, Checkpoint, PassStatus};
pub use orchestrator::{print_status, FleetMode, FleetOrchestrator, FleetSummary};
pub use progress::{estimate_remaining, Phase, Progress};
