//! Error types for the event log, replay, and projection dispatch.

/// Errors returned by an [`EventLog`](crate::EventLog) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventLogError {
    /// An event with the same `(aggregate_id, version)` already exists.
    ///
    /// Surfaced to the sole writer of the aggregate; never retried by the log.
    #[error("concurrency conflict: {aggregate_id} already has version {version}")]
    ConcurrencyConflict {
        /// The aggregate whose version collided.
        aggregate_id: String,
        /// The duplicate version.
        version: u64,
    },

    /// The event is malformed (e.g. version 0 or empty aggregate id).
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// What is wrong with the event.
        reason: String,
    },

    /// The storage backend failed.
    #[error("event log backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Error raised by a single projection handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProjectionError {
    /// Description of the failure.
    pub message: String,
}

impl ProjectionError {
    /// Create a projection error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A projection rejected an event, aborting the rest of the dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("projection {projection} failed on event {event_type} v{version}: {source}")]
pub struct DispatchError {
    /// Name of the projection that failed.
    pub projection: String,
    /// Type tag of the event being dispatched.
    pub event_type: String,
    /// Version of the event being dispatched.
    pub version: u64,
    /// The handler's error.
    pub source: ProjectionError,
}

/// Errors that can occur while rebuilding a read model from the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// Reading the event log failed.
    #[error("replay read failed: {source}")]
    Log {
        /// The underlying log error.
        #[from]
        source: EventLogError,
    },

    /// A projection rejected a replayed event.
    #[error("replay dispatch failed: {source}")]
    Dispatch {
        /// The underlying dispatch error.
        #[from]
        source: DispatchError,
    },
}
