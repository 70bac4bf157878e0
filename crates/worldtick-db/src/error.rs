//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with context about which operation failed.

use worldtick_events::EventLogError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row cannot be represented as a domain value.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for EventLogError {
    fn from(err: DbError) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}
