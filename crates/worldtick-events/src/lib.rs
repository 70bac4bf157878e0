//! Event sourcing for the Worldtick engine.
//!
//! Every clock advance produces an immutable, versioned event. Events are
//! the durable history of a world: its clock state can be reconstructed by
//! replaying them, and read models are folds over them.
//!
//! # Modules
//!
//! - [`log`] -- The [`EventLog`] contract (append-only, optimistic versioning)
//! - [`memory`] -- [`InMemoryEventLog`], the in-process implementation
//! - [`replay`] -- [`ReplayEngine`] for version- and time-bounded reads
//! - [`projection`] -- [`ProjectionDispatcher`] fan-out to read models
//! - [`error`] -- Error types

pub mod error;
pub mod log;
pub mod memory;
pub mod projection;
pub mod replay;

pub use error::{DispatchError, EventLogError, ProjectionError, ReplayError};
pub use log::{EventLog, validate_event};
pub use memory::InMemoryEventLog;
pub use projection::{Projection, ProjectionDispatcher};
pub use replay::{ReplayEngine, ReplayMode};
