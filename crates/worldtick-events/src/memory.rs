//! In-process [`EventLog`] backed by a vector and a per-aggregate index.
//!
//! Used when no database is configured and throughout the test suites.
//! Contents are lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use worldtick_types::Event;

use crate::error::EventLogError;
use crate::log::{EventLog, validate_event};

#[derive(Debug, Default)]
struct MemoryLog {
    /// Events in append order.
    events: Vec<Event>,
    /// `aggregate_id -> version -> index into events`.
    by_aggregate: HashMap<String, BTreeMap<u64, usize>>,
}

impl MemoryLog {
    fn collect(&self, indices: impl Iterator<Item = usize>) -> Vec<Event> {
        indices
            .filter_map(|idx| self.events.get(idx))
            .cloned()
            .collect()
    }
}

/// Thread-safe in-memory event log.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    inner: RwLock<MemoryLog>,
}

impl InMemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append_event(&self, event: &Event) -> Result<(), EventLogError> {
        validate_event(event)?;

        let mut log = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next_index = log.events.len();
        let versions = log
            .by_aggregate
            .entry(event.aggregate_id.clone())
            .or_default();
        if versions.contains_key(&event.version) {
            return Err(EventLogError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id.clone(),
                version: event.version,
            });
        }
        versions.insert(event.version, next_index);
        log.events.push(event.clone());

        tracing::trace!(
            aggregate_id = event.aggregate_id,
            version = event.version,
            event_type = event.event_type,
            "Appended event"
        );
        Ok(())
    }

    async fn events_by_aggregate(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<Event>, EventLogError> {
        let log = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(versions) = log.by_aggregate.get(aggregate_id) else {
            return Ok(Vec::new());
        };
        Ok(log.collect(versions.range(from_version..).map(|(_, &idx)| idx)))
    }

    async fn events_by_type(
        &self,
        event_type: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventLogError> {
        let log = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<Event> = log
            .events
            .iter()
            .filter(|e| e.event_type == event_type && e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn all_events(
        &self,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, EventLogError> {
        let log = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<Event> = log
            .events
            .iter()
            .filter(|e| e.timestamp >= from)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events.truncate(limit);
        Ok(events)
    }

    async fn latest_version(&self, aggregate_id: &str) -> Result<Option<u64>, EventLogError> {
        let log = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .by_aggregate
            .get(aggregate_id)
            .and_then(|versions| versions.keys().next_back().copied()))
    }
}
