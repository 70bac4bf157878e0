//! Shared type definitions for the Worldtick time-simulation engine.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: world clock state, the event record, and the tick broadcast
//! payload. The broadcast payload and its enums flow to `TypeScript` via
//! `ts-rs` for dashboard subscribers.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for worlds and events
//! - [`enums`] -- World status, calendar enums, and world event tags
//! - [`structs`] -- `WorldState`, `Event`, `TickSnapshot`, event payloads

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Season, TimeOfDay, WORLD_AGGREGATE_TYPE, WorldEventType, WorldStatus};
pub use ids::{EventId, WorldId};
pub use structs::{
    Event, TickSnapshot, WorldCreatedDetails, WorldPausedDetails, WorldResumedDetails,
    WorldState, WorldTickedDetails, duration_to_millis, duration_to_nanos,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the broadcast payload.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::WorldId::export_all();
        let _ = crate::ids::EventId::export_all();
        let _ = crate::enums::WorldStatus::export_all();
        let _ = crate::enums::TimeOfDay::export_all();
        let _ = crate::enums::Season::export_all();
        let _ = crate::structs::TickSnapshot::export_all();
    }
}
