//! Incremental mailbox synchronization.
//!
//! One invocation loads the checkpoint and configuration, opens the folder,
//! decides which UIDs are new, relays them in ascending order while time
//! allows, and records where the next invocation should pick up.

pub mod deadline;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

pub use deadline::{Deadline, RemainingTime, Unbounded};
pub use orchestrator::{ScanPlan, ScanReason, SyncOrchestrator, SyncOutcome, plan_scan};
pub use scheduler::{run_with_budget, spawn_sync_scheduler};

/// Stop scanning when less than this much time remains.
///
/// Must exceed the worst case for fetching, delivering and flagging one
/// message.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);
