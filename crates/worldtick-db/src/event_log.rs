//! `PostgreSQL` implementation of the event log contract.
//!
//! One row per event in the `events` table. The
//! `events_aggregate_version_key` unique constraint on
//! `(aggregate_id, version)` provides the optimistic concurrency check: a
//! violating insert surfaces as [`EventLogError::ConcurrencyConflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use worldtick_events::{EventLog, EventLogError, validate_event};
use worldtick_types::{Event, EventId};

use crate::error::DbError;

/// Name of the unique constraint guarding aggregate versions.
const VERSION_CONSTRAINT: &str = "events_aggregate_version_key";

/// Column list shared by every read query.
const EVENT_COLUMNS: &str =
    "id, event_type, aggregate_id, aggregate_type, version, occurred_at, payload";

/// Event log stored in the `events` table.
#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    /// Create an event log bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for PgEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventLog").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append_event(&self, event: &Event) -> Result<(), EventLogError> {
        validate_event(event)?;
        let version = version_to_db(event.version)?;

        let result = sqlx::query(
            r"INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, occurred_at, payload)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.id.into_inner())
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(version)
        .bind(event.timestamp)
        .bind(&event.payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::trace!(
                    aggregate_id = event.aggregate_id,
                    version = event.version,
                    "Inserted event"
                );
                Ok(())
            }
            Err(err) => Err(classify_insert_error(err, event)),
        }
    }

    async fn events_by_aggregate(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<Event>, EventLogError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE aggregate_id = $1 AND version >= $2
             ORDER BY version"
        );
        let from = i64::try_from(from_version).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(aggregate_id)
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        rows_to_events(rows)
    }

    async fn events_by_type(
        &self,
        event_type: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventLogError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE event_type = $1 AND occurred_at >= $2 AND occurred_at <= $3
             ORDER BY occurred_at, id"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_type)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        rows_to_events(rows)
    }

    async fn all_events(
        &self,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, EventLogError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE occurred_at >= $1
             ORDER BY occurred_at, id
             LIMIT $2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(from)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        rows_to_events(rows)
    }

    async fn latest_version(&self, aggregate_id: &str) -> Result<Option<u64>, EventLogError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::from)?;
        max.map(version_from_db).transpose().map_err(EventLogError::from)
    }
}

/// A row from the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event identifier.
    pub id: Uuid,
    /// Event type tag.
    pub event_type: String,
    /// Owning aggregate.
    pub aggregate_id: String,
    /// Kind of aggregate.
    pub aggregate_type: String,
    /// Aggregate version (>= 1).
    pub version: i64,
    /// Real-world timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl TryFrom<EventRow> for Event {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::from(row.id),
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: version_from_db(row.version)?,
            timestamp: row.occurred_at,
            payload: row.payload,
        })
    }
}

fn rows_to_events(rows: Vec<EventRow>) -> Result<Vec<Event>, EventLogError> {
    rows.into_iter()
        .map(|row| Event::try_from(row).map_err(EventLogError::from))
        .collect()
}

fn version_to_db(version: u64) -> Result<i64, EventLogError> {
    i64::try_from(version).map_err(|_err| EventLogError::InvalidEvent {
        reason: format!("version {version} exceeds BIGINT range"),
    })
}

fn version_from_db(version: i64) -> Result<u64, DbError> {
    u64::try_from(version)
        .map_err(|_err| DbError::CorruptRow(format!("negative event version {version}")))
}

/// Map an insert failure to the log's error taxonomy.
fn classify_insert_error(err: sqlx::Error, event: &Event) -> EventLogError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && db_err.constraint() == Some(VERSION_CONSTRAINT) {
            return EventLogError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id.clone(),
                version: event.version,
            };
        }
    }
    DbError::from(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(version: i64) -> EventRow {
        EventRow {
            id: Uuid::now_v7(),
            event_type: "world.ticked".to_owned(),
            aggregate_id: "w1".to_owned(),
            aggregate_type: "world".to_owned(),
            version,
            occurred_at: Utc::now(),
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn row_converts_to_event() {
        let r = row(7);
        let id = r.id;
        let event = Event::try_from(r).ok();
        assert_eq!(event.as_ref().map(|e| e.version), Some(7));
        assert_eq!(event.map(|e| e.id.into_inner()), Some(id));
    }

    #[test]
    fn negative_version_is_corrupt() {
        assert!(matches!(
            Event::try_from(row(-1)),
            Err(DbError::CorruptRow(_))
        ));
    }

    #[test]
    fn oversized_version_is_invalid() {
        assert!(matches!(
            version_to_db(u64::MAX),
            Err(EventLogError::InvalidEvent { .. })
        ));
        assert_eq!(version_to_db(42).ok(), Some(42));
    }
}
