//! Periodic sync invocations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::sync::{Deadline, SyncOrchestrator, SyncOutcome};

/// Run one invocation with `budget` as both its soft deadline and its hard
/// limit. The hard limit abandons the invocation mid-flight; nothing is
/// written in that case.
pub async fn run_with_budget(orchestrator: &SyncOrchestrator, budget: Duration) -> Result<SyncOutcome> {
    let deadline = Deadline::after(budget);
    match tokio::time::timeout(budget, orchestrator.run(&deadline)).await {
        Ok(result) => result,
        Err(_) => Err(Error::BudgetExceeded {
            secs: budget.as_secs(),
        }),
    }
}

/// Spawn a background task that runs a sync invocation every `interval`.
///
/// Invocations never overlap: a slow run delays the next tick rather than
/// stacking up. Failures are logged and retried on the next tick.
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_sync_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    budget: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            budget_secs = budget.as_secs(),
            "Sync scheduler started"
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Sync scheduler shutting down");
                return;
            }

            match run_with_budget(&orchestrator, budget).await {
                Ok(outcome) => info!(?outcome, "Sync finished"),
                Err(e) => error!(error = %e, "Sync failed"),
            }
        }
    });

    (handle, shutdown_flag)
}
