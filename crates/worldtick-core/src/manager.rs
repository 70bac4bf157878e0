//! Supervision of the set of active tickers.
//!
//! The [`TickerManager`] is constructed once by the process root and shared
//! by reference. It spawns, stops, and reports on one ticker per world.
//! Spawn and stop are serialized by a lifecycle lock; status reads never
//! take it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use worldtick_events::{EventLogError, ReplayError};
use worldtick_types::{
    Event, WorldCreatedDetails, WorldEventType, WorldId, WorldPausedDetails, WorldState,
    WorldStatus, duration_to_millis, duration_to_nanos,
};

use crate::calendar::{Calendar, CalendarError};
use crate::catchup::CatchUpPlan;
use crate::config::{ClockConfig, ConfigError};
use crate::registry::RegistryError;
use crate::ticker::{StopSignal, Ticker, TickerContext, TickerDeps, TickerOutcome};
use crate::timeline::restore_world_state;

/// Errors returned by [`TickerManager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    /// A ticker is already active for the world.
    #[error("ticker for world {world_id} is already running")]
    AlreadyRunning {
        /// The world.
        world_id: WorldId,
    },

    /// No ticker is active for the world.
    #[error("ticker for world {world_id} is not running")]
    NotRunning {
        /// The world.
        world_id: WorldId,
    },

    /// The world is unknown.
    #[error("world {world_id} not found")]
    NotFound {
        /// The world.
        world_id: WorldId,
    },

    /// The dilation factor is not finite and positive.
    #[error("invalid dilation factor {dilation_factor}")]
    InvalidDilation {
        /// The rejected factor.
        dilation_factor: f64,
    },

    /// The world has been retired and cannot be spawned.
    #[error("world {world_id} is stopped and cannot be spawned")]
    WorldRetired {
        /// The world.
        world_id: WorldId,
    },

    /// The clock configuration is unusable.
    #[error("invalid clock configuration: {source}")]
    Config {
        /// The underlying error.
        #[from]
        source: ConfigError,
    },

    /// The calendar could not be built.
    #[error("calendar error: {source}")]
    Calendar {
        /// The underlying error.
        #[from]
        source: CalendarError,
    },

    /// A registry operation failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying error.
        #[from]
        source: RegistryError,
    },

    /// A lifecycle event could not be appended.
    #[error("event log error: {source}")]
    EventLog {
        /// The underlying error.
        #[from]
        source: EventLogError,
    },

    /// The world's history could not be replayed.
    #[error("replay error: {source}")]
    Replay {
        /// The underlying error.
        #[from]
        source: ReplayError,
    },

    /// An event payload could not be encoded.
    #[error("failed to encode event: {source}")]
    Encode {
        /// The underlying error.
        #[from]
        source: serde_json::Error,
    },

    /// A ticker task ended abnormally.
    #[error("ticker task failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}

/// Point-in-time view of one world's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerStatus {
    /// Whether a ticker is active for the world.
    pub running: bool,
    /// Lifecycle status recorded in the registry.
    pub status: WorldStatus,
    /// Ticks applied so far.
    pub tick_count: u64,
    /// Simulated time elapsed so far.
    pub game_time: Duration,
}

struct ActiveTicker {
    stop: Arc<StopSignal>,
    handle: JoinHandle<TickerOutcome>,
}

/// How a spawn will start its ticker.
struct Launch {
    version: u64,
    weather_synced_at: Duration,
    catch_up: Option<CatchUpPlan>,
}

/// Owns every active ticker of the process.
pub struct TickerManager {
    ctx: Arc<TickerContext>,
    active: Mutex<HashMap<WorldId, ActiveTicker>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl TickerManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::Config`] or [`TickerError::Calendar`] if the
    /// clock configuration is invalid.
    pub fn new(clock: ClockConfig, deps: TickerDeps) -> Result<Self, TickerError> {
        clock.validate()?;
        let calendar = Calendar::from_config(&clock)?;
        Ok(Self {
            ctx: Arc::new(TickerContext {
                clock,
                calendar,
                deps,
            }),
            active: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Clock configuration in use.
    pub fn clock(&self) -> &ClockConfig {
        &self.ctx.clock
    }

    /// Calendar in use.
    pub fn calendar(&self) -> &Calendar {
        &self.ctx.calendar
    }

    /// Start the ticker of a world.
    ///
    /// A world unknown to both the registry and the event log is created
    /// with a `world.created` event at version 1. A known world is resumed:
    /// if it was paused, the missed ticks are replayed before the steady
    /// loop starts. A world missing from the registry but present in the
    /// log is restored from its history first.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::AlreadyRunning`],
    /// [`TickerError::InvalidDilation`], [`TickerError::WorldRetired`], or an
    /// error from the log or registry.
    pub async fn spawn_ticker(
        &self,
        world_id: WorldId,
        name: &str,
        dilation_factor: f64,
    ) -> Result<(), TickerError> {
        let _guard = self.lifecycle.lock().await;

        if self.active().contains_key(&world_id) {
            return Err(TickerError::AlreadyRunning { world_id });
        }
        if crate::ticker::game_time_delta(self.ctx.clock.tick_interval(), dilation_factor)
            .is_none()
        {
            return Err(TickerError::InvalidDilation { dilation_factor });
        }

        let existing = match self.ctx.deps.registry.get_world(world_id) {
            Ok(state) => Some(state),
            Err(RegistryError::NotFound { .. }) => self.restore(world_id).await?,
            Err(e) => return Err(e.into()),
        };
        let launch = match existing {
            None => self.create(world_id, name, dilation_factor).await?,
            Some(state) => self.resume(&state, name, dilation_factor).await?,
        };

        let stop = Arc::new(StopSignal::new());
        let ticker = Ticker::new(
            world_id,
            dilation_factor,
            launch.version,
            launch.weather_synced_at,
            Arc::clone(&self.ctx),
            Arc::clone(&stop),
        )
        .ok_or(TickerError::InvalidDilation { dilation_factor })?;
        let handle = tokio::spawn(ticker.run(launch.catch_up));

        self.active()
            .insert(world_id, ActiveTicker { stop, handle });
        info!(
            %world_id,
            name,
            dilation_factor,
            catch_up_units = launch.catch_up.map_or(0, |p| p.units),
            "Ticker spawned"
        );
        Ok(())
    }

    /// Stop a world's ticker and pause the world.
    ///
    /// Waits for the ticker to finish its current tick, then records the
    /// world as paused and appends `world.paused`. If the stop interrupted a
    /// catch-up, `paused_at` is moved back by the unreplayed units so the
    /// next spawn replays them.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::NotRunning`] if no ticker is active, or an
    /// error from the registry or log. The world is paused even when the
    /// pause event cannot be appended.
    pub async fn stop_ticker(&self, world_id: WorldId) -> Result<(), TickerError> {
        let _guard = self.lifecycle.lock().await;

        let active = self
            .active()
            .remove(&world_id)
            .ok_or(TickerError::NotRunning { world_id })?;
        active.stop.stop();

        let (version, pending_units) = match active.handle.await {
            Ok(outcome) => (Some(outcome.version), outcome.pending_units),
            Err(e) => {
                warn!(%world_id, error = %e, "Ticker task ended abnormally");
                (None, 0)
            }
        };
        let version = match version {
            Some(version) => version,
            None => self.latest_version(world_id).await?,
        };

        let paused_at = back_date(Utc::now(), self.ctx.clock.tick_interval(), pending_units);
        let (tick_count, game_time, weather_synced_at) =
            self.ctx.deps.registry.update_world(world_id, |world| {
                world.status = WorldStatus::Paused;
                world.paused_at = Some(paused_at);
                (world.tick_count, world.game_time, world.weather_synced_at)
            })?;

        let details = WorldPausedDetails {
            tick_count,
            game_time_ns: duration_to_nanos(game_time),
            paused_at: Some(paused_at),
            weather_synced_at_ns: duration_to_nanos(weather_synced_at),
        };
        let event = Event::world(
            world_id,
            WorldEventType::Paused,
            version.saturating_add(1),
            &details,
        )?;
        self.append(&event).await?;

        info!(
            %world_id,
            tick_count,
            game_time_ms = duration_to_millis(game_time),
            pending_units,
            "Ticker stopped"
        );
        Ok(())
    }

    /// Current clock of a world, running or not.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::NotFound`] if the registry does not hold the
    /// world.
    pub fn ticker_status(&self, world_id: WorldId) -> Result<TickerStatus, TickerError> {
        let state = match self.ctx.deps.registry.get_world(world_id) {
            Ok(state) => state,
            Err(RegistryError::NotFound { .. }) => {
                return Err(TickerError::NotFound { world_id });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(TickerStatus {
            running: self.is_running(world_id),
            status: state.status,
            tick_count: state.tick_count,
            game_time: state.game_time,
        })
    }

    /// Whether a ticker is active for the world.
    pub fn is_running(&self, world_id: WorldId) -> bool {
        self.active().contains_key(&world_id)
    }

    /// Ids of every world with an active ticker.
    pub fn active_worlds(&self) -> Vec<WorldId> {
        self.active().keys().copied().collect()
    }

    /// Stop every active ticker. Returns the number stopped.
    ///
    /// Failures are logged; the remaining tickers are still stopped.
    pub async fn stop_all(&self) -> usize {
        let world_ids = self.active_worlds();
        info!(count = world_ids.len(), "Stopping all tickers");

        let mut stopped: usize = 0;
        for world_id in world_ids {
            match self.stop_ticker(world_id).await {
                Ok(()) => stopped = stopped.saturating_add(1),
                // Stopped concurrently by another caller.
                Err(TickerError::NotRunning { .. }) => {}
                Err(e) => warn!(%world_id, error = %e, "Failed to stop ticker"),
            }
        }
        stopped
    }

    fn active(&self) -> MutexGuard<'_, HashMap<WorldId, ActiveTicker>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn restore(&self, world_id: WorldId) -> Result<Option<WorldState>, TickerError> {
        let Some(state) = restore_world_state(Arc::clone(&self.ctx.deps.log), world_id).await?
        else {
            return Ok(None);
        };
        self.ctx.deps.registry.register_world(state.clone())?;
        Ok(Some(state))
    }

    async fn create(
        &self,
        world_id: WorldId,
        name: &str,
        dilation_factor: f64,
    ) -> Result<Launch, TickerError> {
        let details = WorldCreatedDetails {
            name: name.to_owned(),
            dilation_factor,
            resumed: false,
        };
        let event = Event::world(world_id, WorldEventType::Created, 1, &details)?;
        self.append(&event).await?;
        self.ctx
            .deps
            .registry
            .register_world(WorldState::new(world_id, name, dilation_factor))?;

        info!(%world_id, name, "World created");
        Ok(Launch {
            version: 1,
            weather_synced_at: Duration::ZERO,
            catch_up: None,
        })
    }

    async fn resume(
        &self,
        state: &WorldState,
        name: &str,
        dilation_factor: f64,
    ) -> Result<Launch, TickerError> {
        let world_id = state.id;
        if state.status == WorldStatus::Stopped {
            return Err(TickerError::WorldRetired { world_id });
        }

        let mut version = self.latest_version(world_id).await?;
        if self.ctx.clock.emit_created_on_resume {
            let details = WorldCreatedDetails {
                name: name.to_owned(),
                dilation_factor,
                resumed: true,
            };
            version = version.saturating_add(1);
            let event = Event::world(world_id, WorldEventType::Created, version, &details)?;
            self.append(&event).await?;
        }

        let catch_up = match (state.status, state.paused_at) {
            (WorldStatus::Paused, Some(paused_at)) => Some(CatchUpPlan::compute(
                paused_at,
                Utc::now(),
                self.ctx.clock.tick_interval(),
            )),
            _ => None,
        };
        let renamed = name.to_owned();
        let weather_synced_at = self.ctx.deps.registry.update_world(world_id, |world| {
            world.name = renamed;
            world.dilation_factor = dilation_factor;
            world.status = if catch_up.is_some() {
                WorldStatus::CatchingUp
            } else {
                WorldStatus::Running
            };
            world.paused_at = None;
            world.weather_synced_at
        })?;

        info!(
            %world_id,
            version,
            paused_at = ?state.paused_at,
            "Resuming world"
        );
        Ok(Launch {
            version,
            weather_synced_at,
            catch_up,
        })
    }

    async fn latest_version(&self, world_id: WorldId) -> Result<u64, TickerError> {
        let latest = self
            .ctx
            .deps
            .log
            .latest_version(&world_id.to_string())
            .await?;
        Ok(latest.unwrap_or(0))
    }

    async fn append(&self, event: &Event) -> Result<(), TickerError> {
        self.ctx.deps.log.append_event(event).await?;
        if let Some(projections) = &self.ctx.deps.projections {
            if let Err(e) = projections.project_event(event) {
                warn!(world_id = %event.aggregate_id, error = %e, "Projection failed");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TickerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerManager")
            .field("ctx", &self.ctx)
            .field("active", &self.active_worlds())
            .finish_non_exhaustive()
    }
}

/// `now` moved back by `units` tick intervals.
fn back_date(now: DateTime<Utc>, tick_interval: Duration, units: u64) -> DateTime<Utc> {
    let nanos = tick_interval.as_nanos().saturating_mul(u128::from(units));
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    now.checked_sub_signed(chrono::Duration::nanoseconds(nanos))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use worldtick_events::{EventLog, InMemoryEventLog};

    use super::*;
    use crate::registry::WorldClockRegistry;

    fn setup(
        clock: ClockConfig,
    ) -> (TickerManager, Arc<WorldClockRegistry>, Arc<InMemoryEventLog>) {
        let registry = Arc::new(WorldClockRegistry::new());
        let log = Arc::new(InMemoryEventLog::new());
        let deps = TickerDeps::new(Arc::clone(&registry), Arc::clone(&log) as Arc<dyn EventLog>);
        (TickerManager::new(clock, deps).unwrap(), registry, log)
    }

    async fn event_types(log: &InMemoryEventLog, id: WorldId) -> Vec<String> {
        log.events_by_aggregate(&id.to_string(), 1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[test]
    fn invalid_clock_is_rejected() {
        let registry = Arc::new(WorldClockRegistry::new());
        let deps = TickerDeps::new(registry, Arc::new(InMemoryEventLog::new()));
        let clock = ClockConfig {
            tick_interval_ms: 0,
            ..ClockConfig::default()
        };
        assert!(matches!(
            TickerManager::new(clock, deps),
            Err(TickerError::Config { .. })
        ));
    }

    #[test]
    fn back_date_subtracts_whole_units() {
        let now = Utc::now();
        let earlier = back_date(now, Duration::from_millis(100), 15);
        assert_eq!(now.signed_duration_since(earlier), TimeDelta::milliseconds(1_500));
        assert_eq!(back_date(now, Duration::from_millis(100), 0), now);
    }

    #[tokio::test]
    async fn spawn_creates_world_and_event() {
        let (manager, registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();

        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();

        let state = registry.get_world(id).unwrap();
        assert_eq!(state.status, WorldStatus::Running);
        assert_eq!(state.tick_count, 0);
        assert!(manager.is_running(id));
        assert_eq!(manager.active_worlds(), vec![id]);
        assert_eq!(event_types(&log, id).await, vec!["world.created".to_owned()]);

        manager.stop_ticker(id).await.unwrap();
    }

    #[tokio::test]
    async fn double_spawn_and_double_stop_fail() {
        let (manager, _registry, _log) = setup(ClockConfig::default());
        let id = WorldId::new();

        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        assert!(matches!(
            manager.spawn_ticker(id, "Aster", 1.0).await,
            Err(TickerError::AlreadyRunning { .. })
        ));

        manager.stop_ticker(id).await.unwrap();
        assert!(matches!(
            manager.stop_ticker(id).await,
            Err(TickerError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_dilation_is_rejected() {
        let (manager, registry, _log) = setup(ClockConfig::default());
        let id = WorldId::new();
        for factor in [0.0, -2.0, f64::NAN] {
            assert!(matches!(
                manager.spawn_ticker(id, "Aster", factor).await,
                Err(TickerError::InvalidDilation { .. })
            ));
        }
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn unknown_world_status_is_not_found() {
        let (manager, _registry, _log) = setup(ClockConfig::default());
        let id = WorldId::new();
        assert!(matches!(
            manager.ticker_status(id),
            Err(TickerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stop_pauses_and_records_event() {
        let (manager, registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();
        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        manager.stop_ticker(id).await.unwrap();

        let state = registry.get_world(id).unwrap();
        assert_eq!(state.status, WorldStatus::Paused);
        assert!(state.paused_at.is_some());

        let status = manager.ticker_status(id).unwrap();
        assert!(!status.running);
        assert_eq!(status.status, WorldStatus::Paused);

        let events = log.events_by_aggregate(&id.to_string(), 1).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, "world.paused");
        let details: WorldPausedDetails = last.decode_payload().unwrap();
        assert_eq!(details.tick_count, state.tick_count);
    }

    #[tokio::test]
    async fn resume_emits_created_when_configured() {
        let (manager, registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();
        let mut paused = WorldState::new(id, "Aster", 1.0);
        paused.status = WorldStatus::Paused;
        paused.paused_at = Some(Utc::now());
        registry.register_world(paused).unwrap();

        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        manager.stop_ticker(id).await.unwrap();

        let types = event_types(&log, id).await;
        assert_eq!(types.first().map(String::as_str), Some("world.created"));
        assert!(types.contains(&"world.resumed".to_owned()));
        assert_eq!(types.last().map(String::as_str), Some("world.paused"));
    }

    #[tokio::test]
    async fn resume_without_created_event() {
        let clock = ClockConfig {
            emit_created_on_resume: false,
            ..ClockConfig::default()
        };
        let (manager, registry, log) = setup(clock);
        let id = WorldId::new();
        let mut paused = WorldState::new(id, "Aster", 1.0);
        paused.status = WorldStatus::Paused;
        paused.paused_at = Some(Utc::now());
        registry.register_world(paused).unwrap();

        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        manager.stop_ticker(id).await.unwrap();

        assert!(!event_types(&log, id).await.contains(&"world.created".to_owned()));
    }

    #[tokio::test]
    async fn retired_world_cannot_spawn() {
        let (manager, registry, _log) = setup(ClockConfig::default());
        let id = WorldId::new();
        let mut retired = WorldState::new(id, "Aster", 1.0);
        retired.status = WorldStatus::Stopped;
        registry.register_world(retired).unwrap();

        assert!(matches!(
            manager.spawn_ticker(id, "Aster", 1.0).await,
            Err(TickerError::WorldRetired { .. })
        ));
        assert!(!manager.is_running(id));
    }

    #[tokio::test]
    async fn spawn_restores_world_from_log() {
        let (first, _registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();
        first.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        first.stop_ticker(id).await.unwrap();
        let before = first.ticker_status(id).unwrap();
        let last_version = log.latest_version(&id.to_string()).await.unwrap().unwrap();

        // A fresh registry, as after a restart, sharing the same log.
        let registry = Arc::new(WorldClockRegistry::new());
        let deps = TickerDeps::new(Arc::clone(&registry), Arc::clone(&log) as Arc<dyn EventLog>);
        let second = TickerManager::new(ClockConfig::default(), deps).unwrap();
        second.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        second.stop_ticker(id).await.unwrap();

        let after = second.ticker_status(id).unwrap();
        assert!(after.tick_count >= before.tick_count);
        assert!(after.game_time >= before.game_time);
        let resumed_created = log
            .events_by_aggregate(&id.to_string(), last_version.saturating_add(1))
            .await
            .unwrap();
        assert_eq!(
            resumed_created.first().map(|e| e.event_type.as_str()),
            Some("world.created")
        );
    }

    #[tokio::test]
    async fn interrupted_catch_up_survives_restore() {
        let (manager, registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();
        let mut paused = WorldState::new(id, "Aster", 1.0);
        paused.status = WorldStatus::Paused;
        paused.paused_at = Utc::now().checked_sub_signed(TimeDelta::hours(1));
        registry.register_world(paused).unwrap();

        manager.spawn_ticker(id, "Aster", 1.0).await.unwrap();
        manager.stop_ticker(id).await.unwrap();
        let live = registry.get_world(id).unwrap();

        let restored = restore_world_state(Arc::clone(&log) as Arc<dyn EventLog>, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.paused_at, live.paused_at);
        assert_eq!(restored.tick_count, live.tick_count);
        assert_eq!(restored.game_time, live.game_time);

        let remaining = CatchUpPlan::compute(
            restored.paused_at.unwrap(),
            Utc::now(),
            manager.clock().tick_interval(),
        );
        assert!(remaining.missed > Duration::from_secs(3_000));
    }

    #[tokio::test]
    async fn stop_all_pauses_every_world() {
        let (manager, registry, _log) = setup(ClockConfig::default());
        let ids = [WorldId::new(), WorldId::new(), WorldId::new()];
        for id in ids {
            manager.spawn_ticker(id, "World", 2.0).await.unwrap();
        }

        assert_eq!(manager.stop_all().await, 3);
        assert!(manager.active_worlds().is_empty());
        for id in ids {
            assert_eq!(registry.get_world(id).unwrap().status, WorldStatus::Paused);
        }
    }

    #[tokio::test]
    async fn corrupt_history_blocks_spawn() {
        let (manager, registry, log) = setup(ClockConfig::default());
        let id = WorldId::new();
        // History whose creation payload cannot be decoded.
        let foreign = Event::new("world.created", id.to_string(), "world", 1, b"not json".to_vec());
        log.append_event(&foreign).await.unwrap();

        let err = manager.spawn_ticker(id, "Aster", 1.0).await.unwrap_err();
        assert!(matches!(err, TickerError::Replay { .. }));
        assert!(!registry.contains(id));
    }
}
