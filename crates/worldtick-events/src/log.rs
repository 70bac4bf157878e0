//! The event log contract.
//!
//! The log is append-only: there is no update or delete operation. The
//! unique constraint on `(aggregate_id, version)` is the sole concurrency
//! mechanism callers rely on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use worldtick_types::Event;

use crate::error::EventLogError;

/// An append-only, optimistically-versioned store of domain events.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Durably append one event.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConcurrencyConflict`] if an event with the
    /// same `(aggregate_id, version)` exists, [`EventLogError::InvalidEvent`]
    /// for a malformed event, or [`EventLogError::Backend`] on storage failure.
    async fn append_event(&self, event: &Event) -> Result<(), EventLogError>;

    /// Events of one aggregate with `version >= from_version`, ascending by
    /// version.
    async fn events_by_aggregate(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<Event>, EventLogError>;

    /// Events of one type with `from <= timestamp <= to`, ascending by
    /// timestamp.
    async fn events_by_type(
        &self,
        event_type: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventLogError>;

    /// Global feed of events with `timestamp >= from`, ascending by
    /// timestamp, capped at `limit`.
    async fn all_events(
        &self,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, EventLogError>;

    /// Highest version stored for an aggregate, or `None` if it has no events.
    async fn latest_version(&self, aggregate_id: &str) -> Result<Option<u64>, EventLogError> {
        let events = self.events_by_aggregate(aggregate_id, 1).await?;
        Ok(events.last().map(|e| e.version))
    }
}

/// Reject events the log must never store.
///
/// # Errors
///
/// Returns [`EventLogError::InvalidEvent`] for version 0 or an empty
/// aggregate id or type tag.
pub fn validate_event(event: &Event) -> Result<(), EventLogError> {
    if event.version == 0 {
        return Err(EventLogError::InvalidEvent {
            reason: "version must be at least 1".to_owned(),
        });
    }
    if event.aggregate_id.is_empty() {
        return Err(EventLogError::InvalidEvent {
            reason: "aggregate_id must not be empty".to_owned(),
        });
    }
    if event.event_type.is_empty() {
        return Err(EventLogError::InvalidEvent {
            reason: "event_type must not be empty".to_owned(),
        });
    }
    Ok(())
}
