//! Remaining-time accessors handed to a sync invocation.

use std::time::Duration;

use tokio::time::Instant;

/// Reports how much of the invocation's allowance is left.
pub trait RemainingTime: Send + Sync {
    fn remaining(&self) -> Duration;
}

/// A fixed point in time after which no allowance remains.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }
}

impl RemainingTime for Deadline {
    fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// No deadline at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl RemainingTime for Unbounded {
    fn remaining(&self) -> Duration {
        Duration::MAX
    }
}
