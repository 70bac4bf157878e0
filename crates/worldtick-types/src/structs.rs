//! Core entity structs: world clock state, the event record, the tick
//! broadcast payload, and the JSON payloads of world events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Season, TimeOfDay, WORLD_AGGREGATE_TYPE, WorldEventType, WorldStatus};
use crate::ids::{EventId, WorldId};

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// Clock state of a single world.
///
/// `tick_count` and `game_time` never decrease while the world exists.
/// `paused_at` is `Some` exactly when `status` is [`WorldStatus::Paused`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// World identifier.
    pub id: WorldId,
    /// Human-readable world name.
    pub name: String,
    /// Current lifecycle status.
    pub status: WorldStatus,
    /// Number of clock advances applied since creation.
    pub tick_count: u64,
    /// Total simulated time elapsed since creation.
    pub game_time: Duration,
    /// Simulated time per unit of real time.
    pub dilation_factor: f64,
    /// When the world was first spawned.
    pub created_at: DateTime<Utc>,
    /// When the clock last advanced (creation time before the first tick).
    pub last_tick_at: DateTime<Utc>,
    /// When the clock was paused, present only while paused.
    pub paused_at: Option<DateTime<Utc>>,
    /// Game time of the last weather collaborator invocation.
    #[serde(default)]
    pub weather_synced_at: Duration,
}

impl WorldState {
    /// Create the state of a brand-new running world.
    pub fn new(id: WorldId, name: impl Into<String>, dilation_factor: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            status: WorldStatus::Running,
            tick_count: 0,
            game_time: Duration::ZERO,
            dilation_factor,
            created_at: now,
            last_tick_at: now,
            paused_at: None,
            weather_synced_at: Duration::ZERO,
        }
    }

    /// Whether `paused_at` agrees with `status`.
    pub const fn pause_marker_consistent(&self) -> bool {
        matches!(
            (self.status, self.paused_at),
            (WorldStatus::Paused, Some(_))
                | (
                    WorldStatus::Running | WorldStatus::CatchingUp | WorldStatus::Stopped,
                    None
                )
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable, versioned record in the append-only event log.
///
/// `(aggregate_id, version)` is unique across the whole log. Versions of one
/// aggregate are produced by a single writer and start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event identifier.
    pub id: EventId,
    /// Event type tag (e.g. `world.ticked`).
    pub event_type: String,
    /// Identity of the aggregate this event belongs to.
    pub aggregate_id: String,
    /// Kind of aggregate (e.g. `world`).
    pub aggregate_type: String,
    /// Position of this event in the aggregate's history, starting at 1.
    pub version: u64,
    /// Real-world instant the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Event {
    /// Create an event stamped with a fresh id and the current time.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        version: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a world event whose payload is `details` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `details` cannot be serialized.
    pub fn world<T: Serialize>(
        world_id: WorldId,
        event_type: WorldEventType,
        version: u64,
        details: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(details)?;
        Ok(Self::new(
            event_type.as_str(),
            world_id.to_string(),
            WORLD_AGGREGATE_TYPE,
            version,
            payload,
        ))
    }

    /// The world event type, if this is a world event.
    pub fn world_event_type(&self) -> Option<WorldEventType> {
        if self.aggregate_type == WORLD_AGGREGATE_TYPE {
            WorldEventType::parse(&self.event_type)
        } else {
            None
        }
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload is not valid JSON for `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Tick broadcast
// ---------------------------------------------------------------------------

/// Ephemeral snapshot published to subscribers after every clock advance.
///
/// The calendar fields are derived purely from `game_time_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TickSnapshot {
    /// The world that advanced.
    pub world_id: WorldId,
    /// Tick count after the advance.
    pub tick_number: u64,
    /// Total simulated time in milliseconds.
    pub game_time_ms: u64,
    /// Wall-clock instant of the advance, Unix milliseconds.
    pub real_time_ms: i64,
    /// Dilation factor in effect.
    pub dilation_factor: f64,
    /// Coarse time of day.
    pub time_of_day: TimeOfDay,
    /// Fraction of the simulated day elapsed, in `[0, 1)`.
    pub sun_position: f64,
    /// Current season.
    pub current_season: Season,
    /// Fraction of the current season elapsed, in `[0, 1)`.
    pub season_progress: f64,
}

// ---------------------------------------------------------------------------
// World event payloads
// ---------------------------------------------------------------------------

/// Saturating conversion of a duration to whole nanoseconds.
pub fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Saturating conversion of a duration to whole milliseconds.
pub fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Payload of `world.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldCreatedDetails {
    /// World name at spawn time.
    pub name: String,
    /// Dilation factor requested by the spawn.
    pub dilation_factor: f64,
    /// `true` when the spawn resumed an existing world.
    #[serde(default)]
    pub resumed: bool,
}

/// Payload of `world.ticked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldTickedDetails {
    /// Tick count after the advance.
    pub tick_count: u64,
    /// Total simulated time after the advance, in nanoseconds.
    pub game_time_ns: u64,
    /// Simulated time added by this advance, in nanoseconds.
    pub tick_duration_ns: u64,
    /// `true` if the advance was replayed during catch-up.
    #[serde(default)]
    pub catch_up: bool,
}

impl WorldTickedDetails {
    /// Total simulated time after the advance.
    pub const fn game_time(&self) -> Duration {
        Duration::from_nanos(self.game_time_ns)
    }
}

/// Payload of `world.paused`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldPausedDetails {
    /// Tick count when the ticker stopped.
    pub tick_count: u64,
    /// Total simulated time when the ticker stopped, in nanoseconds.
    pub game_time_ns: u64,
    /// Pause marker the next resume replays from. Earlier than the event
    /// timestamp when the stop interrupted a catch-up.
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    /// Game time of the last weather invocation, in nanoseconds.
    #[serde(default)]
    pub weather_synced_at_ns: u64,
}

impl WorldPausedDetails {
    /// Total simulated time when the ticker stopped.
    pub const fn game_time(&self) -> Duration {
        Duration::from_nanos(self.game_time_ns)
    }

    /// Game time of the last weather invocation.
    pub const fn weather_synced_at(&self) -> Duration {
        Duration::from_nanos(self.weather_synced_at_ns)
    }
}

/// Payload of `world.resumed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldResumedDetails {
    /// Number of missed ticks replayed.
    pub replayed_units: u64,
    /// Real time the world spent paused, in milliseconds.
    pub missed_real_ms: u64,
}
