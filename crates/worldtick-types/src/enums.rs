//! Enumeration types for the Worldtick engine.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// World lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a world's simulated clock.
///
/// ```text
/// (absent) --spawn--> Running --stop--> Paused --spawn--> CatchingUp
///                        ^                                    |
///                        +--------- replay exhausted ---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum WorldStatus {
    /// The clock advances once per tick interval.
    Running,
    /// The clock is halted; `paused_at` records when.
    Paused,
    /// Missed ticks are being replayed back-to-back after a pause.
    CatchingUp,
    /// The world has been retired and may not be spawned again.
    Stopped,
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// Coarse time of day derived from the sun position within a simulated day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TimeOfDay {
    /// Before dawn and after evening.
    Night,
    /// Sunrise.
    Dawn,
    /// Forenoon.
    Morning,
    /// Sun at its highest.
    Noon,
    /// Post-meridian daylight.
    Afternoon,
    /// Sunset.
    Dusk,
    /// Last light before night.
    Evening,
}

/// One quarter of the simulated year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Season {
    /// First quarter; the year starts here at game time zero.
    Spring,
    /// Second quarter.
    Summer,
    /// Third quarter.
    Autumn,
    /// Fourth quarter.
    Winter,
}

impl Season {
    /// Seasons in calendar order.
    pub const ALL: [Self; 4] = [Self::Spring, Self::Summer, Self::Autumn, Self::Winter];
}

// ---------------------------------------------------------------------------
// Event tags
// ---------------------------------------------------------------------------

/// Aggregate type tag carried by every world event.
pub const WORLD_AGGREGATE_TYPE: &str = "world";

/// Event types emitted for the world aggregate.
///
/// The event log stores the tag as a plain string so that it can hold other
/// aggregates too; [`as_str`](Self::as_str) and [`parse`](Self::parse)
/// convert between the two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorldEventType {
    /// A ticker was spawned for the world.
    Created,
    /// The world clock advanced by one tick.
    Ticked,
    /// The ticker was stopped.
    Paused,
    /// A catch-up replay finished and the steady-state loop took over.
    Resumed,
}

impl WorldEventType {
    /// Return the wire tag for this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "world.created",
            Self::Ticked => "world.ticked",
            Self::Paused => "world.paused",
            Self::Resumed => "world.resumed",
        }
    }

    /// Parse a wire tag. Returns `None` for tags owned by other aggregates.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "world.created" => Some(Self::Created),
            "world.ticked" => Some(Self::Ticked),
            "world.paused" => Some(Self::Paused),
            "world.resumed" => Some(Self::Resumed),
            _ => None,
        }
    }
}

impl core::fmt::Display for WorldEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tags_roundtrip() {
        for et in [
            WorldEventType::Created,
            WorldEventType::Ticked,
            WorldEventType::Paused,
            WorldEventType::Resumed,
        ] {
            assert_eq!(WorldEventType::parse(et.as_str()), Some(et));
        }
        assert_eq!(WorldEventType::parse("ledger.entry"), None);
    }

    #[test]
    fn seasons_are_in_calendar_order() {
        assert_eq!(Season::ALL.first(), Some(&Season::Spring));
        assert_eq!(Season::ALL.last(), Some(&Season::Winter));
    }
}
