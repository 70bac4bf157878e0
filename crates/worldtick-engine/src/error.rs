//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps a subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: worldtick_core::ConfigError,
    },

    /// A ticker could not be created, spawned, or stopped.
    #[error("ticker error: {source}")]
    Ticker {
        /// The underlying ticker error.
        #[from]
        source: worldtick_core::TickerError,
    },

    /// The `PostgreSQL` event log could not be opened.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: worldtick_db::DbError,
    },

    /// Read models could not be rebuilt at startup.
    #[error("replay error: {source}")]
    Replay {
        /// The underlying replay error.
        #[from]
        source: worldtick_events::ReplayError,
    },

    /// NATS connection failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
