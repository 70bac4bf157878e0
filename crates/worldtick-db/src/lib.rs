//! Data layer for the Worldtick engine (`PostgreSQL`).
//!
//! Provides the durable implementation of the event log contract defined in
//! `worldtick-events`. The in-memory log is used when no database is
//! configured; this crate takes over when one is.
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, migrations
//! - [`event_log`] -- [`PgEventLog`], the `events` table implementation
//! - [`error`] -- Shared error types

pub mod error;
pub mod event_log;
pub mod postgres;

pub use error::DbError;
pub use event_log::{EventRow, PgEventLog};
pub use postgres::{PostgresConfig, PostgresPool};
