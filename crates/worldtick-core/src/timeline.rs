//! World timeline read model and world-state restoration.
//!
//! [`WorldTimelineProjection`] folds world events into one [`WorldTimeline`]
//! per world. [`restore_world_state`] replays a world's history through a
//! fresh projection to rebuild a [`WorldState`] for a world the registry no
//! longer holds, e.g. after a process restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use worldtick_events::{
    EventLog, Projection, ProjectionDispatcher, ProjectionError, ReplayEngine, ReplayError,
};
use worldtick_types::{
    Event, WorldCreatedDetails, WorldEventType, WorldId, WorldPausedDetails, WorldState,
    WorldStatus, WorldTickedDetails,
};

/// Folded history of one world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldTimeline {
    /// The world.
    pub world_id: WorldId,
    /// Name from the latest creation event.
    pub name: String,
    /// Dilation factor from the latest creation event.
    pub dilation_factor: f64,
    /// Highest tick count recorded.
    pub tick_count: u64,
    /// Highest game time recorded.
    pub game_time: Duration,
    /// Timestamp of the first creation event.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent event.
    pub last_event_at: DateTime<Utc>,
    /// Version of the most recent event.
    pub last_version: u64,
    /// Whether the most recent lifecycle event was a pause.
    pub paused: bool,
    /// Pause marker of the latest pause not yet followed by a tick.
    pub paused_at: Option<DateTime<Utc>>,
    /// Game time of the last weather invocation, as of the latest pause.
    pub weather_synced_at: Duration,
    /// Completed catch-ups.
    pub resumes: u64,
}

impl WorldTimeline {
    /// World state for a world whose driver is gone, so the next spawn
    /// replays the gap. The world is paused at the marker of its latest
    /// pause, or at its last recorded event if it ticked since.
    pub fn to_paused_state(&self) -> WorldState {
        WorldState {
            id: self.world_id,
            name: self.name.clone(),
            status: WorldStatus::Paused,
            tick_count: self.tick_count,
            game_time: self.game_time,
            dilation_factor: self.dilation_factor,
            created_at: self.created_at,
            last_tick_at: self.last_event_at,
            paused_at: Some(self.paused_at.unwrap_or(self.last_event_at)),
            weather_synced_at: self.weather_synced_at,
        }
    }

    fn record_totals(&mut self, tick_count: u64, game_time: Duration) {
        self.tick_count = self.tick_count.max(tick_count);
        self.game_time = self.game_time.max(game_time);
    }
}

/// Read model of every world's timeline.
#[derive(Debug, Default)]
pub struct WorldTimelineProjection {
    timelines: Mutex<HashMap<WorldId, WorldTimeline>>,
}

impl WorldTimelineProjection {
    /// Create an empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The folded timeline of `world_id`, if any event was seen for it.
    pub fn timeline(&self, world_id: WorldId) -> Option<WorldTimeline> {
        self.timelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&world_id)
            .cloned()
    }

    fn decode<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T, ProjectionError> {
        event.decode_payload().map_err(|e| {
            ProjectionError::new(format!(
                "bad {} payload at v{}: {e}",
                event.event_type, event.version
            ))
        })
    }
}

impl Projection for WorldTimelineProjection {
    fn name(&self) -> &str {
        "world_timeline"
    }

    fn handle_event(&self, event: &Event) -> Result<(), ProjectionError> {
        let Some(event_type) = event.world_event_type() else {
            return Ok(());
        };
        let world_id: WorldId = event.aggregate_id.parse().map_err(|e| {
            ProjectionError::new(format!("bad world id {}: {e}", event.aggregate_id))
        })?;

        let mut timelines = self.timelines.lock().unwrap_or_else(PoisonError::into_inner);

        if event_type == WorldEventType::Created {
            let details: WorldCreatedDetails = Self::decode(event)?;
            let timeline = timelines.entry(world_id).or_insert_with(|| WorldTimeline {
                world_id,
                name: details.name.clone(),
                dilation_factor: details.dilation_factor,
                tick_count: 0,
                game_time: Duration::ZERO,
                created_at: event.timestamp,
                last_event_at: event.timestamp,
                last_version: event.version,
                paused: false,
                paused_at: None,
                weather_synced_at: Duration::ZERO,
                resumes: 0,
            });
            timeline.name = details.name;
            timeline.dilation_factor = details.dilation_factor;
            timeline.last_event_at = event.timestamp;
            timeline.last_version = event.version;
            return Ok(());
        }

        let timeline = timelines.get_mut(&world_id).ok_or_else(|| {
            ProjectionError::new(format!(
                "{} for world {world_id} before its creation",
                event.event_type
            ))
        })?;

        match event_type {
            WorldEventType::Created => {}
            WorldEventType::Ticked => {
                let details: WorldTickedDetails = Self::decode(event)?;
                timeline.record_totals(details.tick_count, details.game_time());
                timeline.paused = false;
                timeline.paused_at = None;
            }
            WorldEventType::Paused => {
                let details: WorldPausedDetails = Self::decode(event)?;
                timeline.record_totals(details.tick_count, details.game_time());
                timeline.weather_synced_at =
                    timeline.weather_synced_at.max(details.weather_synced_at());
                timeline.paused = true;
                timeline.paused_at = Some(details.paused_at.unwrap_or(event.timestamp));
            }
            WorldEventType::Resumed => {
                timeline.resumes = timeline.resumes.saturating_add(1);
                timeline.paused = false;
                timeline.paused_at = None;
            }
        }
        timeline.last_event_at = event.timestamp;
        timeline.last_version = event.version;
        Ok(())
    }
}

/// Rebuild a world's state from its event history.
///
/// Returns `Ok(None)` if the log holds no events for the world. A restored
/// world is `Paused`; see [`WorldTimeline::to_paused_state`].
///
/// # Errors
///
/// Returns [`ReplayError`] if the log cannot be read or the history is
/// malformed.
pub async fn restore_world_state(
    log: Arc<dyn EventLog>,
    world_id: WorldId,
) -> Result<Option<WorldState>, ReplayError> {
    let projection = Arc::new(WorldTimelineProjection::new());
    let mut dispatcher = ProjectionDispatcher::new();
    dispatcher.register_projection(Arc::clone(&projection) as Arc<dyn Projection>);

    let applied = ReplayEngine::new(log)
        .rebuild(&world_id.to_string(), &dispatcher)
        .await?;
    if applied == 0 {
        return Ok(None);
    }

    let restored = projection.timeline(world_id).map(|t| t.to_paused_state());
    if let Some(state) = &restored {
        info!(
            %world_id,
            events = applied,
            tick_count = state.tick_count,
            "Restored world state from event log"
        );
    }
    Ok(restored)
}
