//! Pacing gate: concurrency cap plus minimum spacing between dispatches.

use tokio::time::{Duration, Instant};

/// Answer from the pacing gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Dispatch may proceed now.
    Open,
    /// Every slot is busy; re-check when something completes.
    Saturated,
    /// Too soon after the previous dispatch; re-check after this long.
    Wait(Duration),
}

/// Both constraints must hold for a dispatch to go ahead.
#[derive(Debug, Clone, Copy)]
pub struct PacingGate {
    max_concurrent: usize,
    min_delay: Duration,
}

impl PacingGate {
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            max_concurrent,
            min_delay,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Check whether a new item may be dispatched at `now`.
    pub fn check(&self, active: usize, last_dispatch: Option<Instant>, now: Instant) -> Gate {
        if active >= self.max_concurrent {
            return Gate::Saturated;
        }

        if let Some(last) = last_dispatch {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_delay {
                return Gate::Wait(self.min_delay - elapsed);
            }
        }

        Gate::Open
    }
}
