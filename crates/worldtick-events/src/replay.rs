//! Range- and time-bounded reads over the event log.
//!
//! # Ordering assumption
//!
//! [`ReplayMode::OrderedEarlyExit`] stops reading as soon as an event falls
//! outside the requested range. That is only correct while each aggregate
//! has a single writer, which guarantees timestamps ascend with versions.
//! If several writers may ever append to one aggregate, construct the engine
//! with [`ReplayMode::FullScan`] instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use worldtick_types::Event;

use crate::error::{EventLogError, ReplayError};
use crate::log::EventLog;
use crate::projection::ProjectionDispatcher;

/// How the engine bounds a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Stop at the first out-of-range event (single writer per aggregate).
    #[default]
    OrderedEarlyExit,
    /// Read the whole history and filter (multiple writers per aggregate).
    FullScan,
}

/// Read-side query engine over an [`EventLog`].
#[derive(Clone)]
pub struct ReplayEngine {
    log: Arc<dyn EventLog>,
    mode: ReplayMode,
}

impl ReplayEngine {
    /// Create an engine using ordered early exit.
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            mode: ReplayMode::OrderedEarlyExit,
        }
    }

    /// Set the replay mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ReplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// The configured replay mode.
    pub const fn mode(&self) -> ReplayMode {
        self.mode
    }

    /// Events of `aggregate_id` with `from_version <= version <= to_version`,
    /// ascending by version. An inverted range yields no events.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the log read fails.
    pub async fn replay_events(
        &self,
        aggregate_id: &str,
        from_version: u64,
        to_version: u64,
    ) -> Result<Vec<Event>, EventLogError> {
        if from_version > to_version {
            return Ok(Vec::new());
        }
        let events = self
            .log
            .events_by_aggregate(aggregate_id, from_version)
            .await?;

        let selected = match self.mode {
            ReplayMode::OrderedEarlyExit => events
                .into_iter()
                .take_while(|e| e.version <= to_version)
                .collect(),
            ReplayMode::FullScan => events
                .into_iter()
                .filter(|e| e.version >= from_version && e.version <= to_version)
                .collect(),
        };
        Ok(selected)
    }

    /// Every event of `aggregate_id` with `timestamp <= at`, ascending by
    /// version.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the log read fails.
    pub async fn rewind_to_timestamp(
        &self,
        aggregate_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventLogError> {
        let events = self.log.events_by_aggregate(aggregate_id, 1).await?;

        let selected = match self.mode {
            ReplayMode::OrderedEarlyExit => events
                .into_iter()
                .take_while(|e| e.timestamp <= at)
                .collect(),
            ReplayMode::FullScan => events.into_iter().filter(|e| e.timestamp <= at).collect(),
        };
        Ok(selected)
    }

    /// Replay the full history of `aggregate_id` through `dispatcher`.
    ///
    /// Returns the number of events dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError`] if the read fails or a projection rejects an
    /// event; events before the failing one stay applied.
    pub async fn rebuild(
        &self,
        aggregate_id: &str,
        dispatcher: &ProjectionDispatcher,
    ) -> Result<u64, ReplayError> {
        let events = self.log.events_by_aggregate(aggregate_id, 1).await?;
        let mut applied: u64 = 0;
        for event in &events {
            dispatcher.project_event(event)?;
            applied = applied.saturating_add(1);
        }
        tracing::debug!(aggregate_id, applied, "Rebuilt projections from log");
        Ok(applied)
    }
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
