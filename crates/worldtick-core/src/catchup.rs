//! Reconciliation of simulated time after a pause.
//!
//! When a paused world is spawned again, every tick interval of real time
//! that passed while it was paused becomes one missed unit. The units are
//! replayed back-to-back through the same advance a steady tick performs,
//! so replay cost depends on the number of units rather than on how long
//! the pause lasted. A stop is honoured between units, never inside one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::ticker::Ticker;

/// Missed work computed at resume time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpPlan {
    /// Real time elapsed since the pause.
    pub missed: Duration,
    /// Whole tick intervals in `missed`.
    pub units: u64,
}

impl CatchUpPlan {
    /// Plan the replay for a world paused at `paused_at` and resumed at
    /// `now`. A `paused_at` in the future yields an empty plan.
    pub fn compute(paused_at: DateTime<Utc>, now: DateTime<Utc>, tick_interval: Duration) -> Self {
        let missed = now
            .signed_duration_since(paused_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let units = missed
            .as_nanos()
            .checked_div(tick_interval.as_nanos())
            .unwrap_or(0);
        Self {
            missed,
            units: u64::try_from(units).unwrap_or(u64::MAX),
        }
    }

    /// Whether there is nothing to replay.
    pub const fn is_empty(&self) -> bool {
        self.units == 0
    }
}

/// Result of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Units fully applied.
    pub applied: u64,
    /// Units left unapplied because a stop was requested.
    pub pending: u64,
}

/// Replays missed units against a ticker.
#[derive(Debug, Clone, Copy)]
pub struct CatchUpEngine {
    yield_every: u64,
}

impl CatchUpEngine {
    /// Create an engine that yields to the runtime every `yield_every`
    /// units. Zero is raised to one, matching the clock configuration's
    /// lower bound.
    pub const fn new(yield_every: u64) -> Self {
        let yield_every = if yield_every == 0 { 1 } else { yield_every };
        Self { yield_every }
    }

    /// Apply the plan's units one at a time, checking for a stop before
    /// each.
    pub async fn replay(&self, ticker: &mut Ticker, plan: &CatchUpPlan) -> CatchUpReport {
        let mut applied: u64 = 0;
        while applied < plan.units {
            if ticker.stop_requested() {
                break;
            }
            ticker.advance(true).await;
            applied = applied.saturating_add(1);
            if applied.checked_rem(self.yield_every) == Some(0) {
                tokio::task::yield_now().await;
            }
        }
        let pending = plan.units.saturating_sub(applied);
        debug!(world_id = %ticker.world_id(), applied, pending, "Replay finished");
        CatchUpReport { applied, pending }
    }
}
