//! The per-world clock driver.
//!
//! A [`Ticker`] owns one world's tick loop. Every advance, whether paced by
//! the interval timer or replayed during catch-up, runs the same steps:
//!
//! 1. Add `tick_interval x dilation_factor` to the world's game time and
//!    bump its tick count in the registry.
//! 2. Publish a [`TickSnapshot`](worldtick_types::TickSnapshot) on the
//!    world's topic.
//! 3. Append a `world.ticked` event at the next version.
//! 4. Call the weather collaborator once enough game time has accumulated.
//!
//! Steps 2-4 are side effects. Each is bounded by the configured timeout,
//! and a failure is logged and absorbed so the clock keeps advancing. Only
//! the [`StopSignal`] ends the loop.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use worldtick_events::{EventLog, ProjectionDispatcher};
use worldtick_types::{
    Event, WorldEventType, WorldId, WorldResumedDetails, WorldState, WorldStatus,
    WorldTickedDetails, duration_to_millis, duration_to_nanos,
};

use crate::broadcast::{Broadcaster, tick_topic};
use crate::calendar::{Calendar, synthetic_instant};
use crate::catchup::{CatchUpEngine, CatchUpPlan};
use crate::config::ClockConfig;
use crate::registry::WorldClockRegistry;
use crate::weather::WeatherCollaborator;

/// Cooperative cancellation flag shared by a ticker and its manager.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Create an unsignalled stop flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake the ticker.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested. Returns immediately if one already
    /// has been.
    pub async fn stopped(&self) {
        while !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

/// Collaborators a ticker writes to. Only the registry and event log are
/// required.
#[derive(Clone)]
pub struct TickerDeps {
    /// Shared clock state.
    pub registry: Arc<WorldClockRegistry>,
    /// Durable event log.
    pub log: Arc<dyn EventLog>,
    /// Snapshot publisher.
    pub broadcaster: Option<Arc<dyn Broadcaster>>,
    /// Weather service.
    pub weather: Option<Arc<dyn WeatherCollaborator>>,
    /// Read models updated after each successful append.
    pub projections: Option<Arc<ProjectionDispatcher>>,
}

impl TickerDeps {
    /// Dependencies with no optional collaborators.
    pub fn new(registry: Arc<WorldClockRegistry>, log: Arc<dyn EventLog>) -> Self {
        Self {
            registry,
            log,
            broadcaster: None,
            weather: None,
            projections: None,
        }
    }

    /// Publish tick snapshots through `broadcaster`.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Call `weather` as game time accumulates.
    #[must_use]
    pub fn with_weather(mut self, weather: Arc<dyn WeatherCollaborator>) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Dispatch appended events to `projections`.
    #[must_use]
    pub fn with_projections(mut self, projections: Arc<ProjectionDispatcher>) -> Self {
        self.projections = Some(projections);
        self
    }
}

impl fmt::Debug for TickerDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerDeps")
            .field("registry", &self.registry)
            .field("broadcaster", &self.broadcaster.is_some())
            .field("weather", &self.weather.is_some())
            .field("projections", &self.projections.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration and collaborators shared by every ticker of a manager.
#[derive(Debug)]
pub struct TickerContext {
    /// Clock cadence and side-effect settings.
    pub clock: ClockConfig,
    /// Calendar derived from `clock`.
    pub calendar: Calendar,
    /// Collaborators.
    pub deps: TickerDeps,
}

/// Simulated time one tick adds at `dilation_factor`, rounded to the
/// nearest nanosecond.
///
/// Returns `None` unless the factor is finite and positive and the result
/// fits in a [`Duration`] of `u64` nanoseconds.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn game_time_delta(tick_interval: Duration, dilation_factor: f64) -> Option<Duration> {
    if !(dilation_factor.is_finite() && dilation_factor > 0.0) {
        return None;
    }
    let nanos = (tick_interval.as_nanos() as f64 * dilation_factor).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

/// What a ticker task reports when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerOutcome {
    /// Last event version the ticker assigned.
    pub version: u64,
    /// Catch-up units that were not applied because of a stop.
    pub pending_units: u64,
}

/// Drives one world's simulated clock.
pub struct Ticker {
    world_id: WorldId,
    dilation_factor: f64,
    game_time_delta: Duration,
    version: u64,
    last_weather_game_time: Duration,
    ctx: Arc<TickerContext>,
    stop: Arc<StopSignal>,
}

impl Ticker {
    /// Create a ticker whose next event is `version + 1`.
    ///
    /// `weather_synced_at` is the game time of the world's last weather
    /// invocation; the next call comes one weather interval after it.
    /// Returns `None` if `dilation_factor` is not a valid factor.
    pub fn new(
        world_id: WorldId,
        dilation_factor: f64,
        version: u64,
        weather_synced_at: Duration,
        ctx: Arc<TickerContext>,
        stop: Arc<StopSignal>,
    ) -> Option<Self> {
        let game_time_delta = game_time_delta(ctx.clock.tick_interval(), dilation_factor)?;
        Some(Self {
            world_id,
            dilation_factor,
            game_time_delta,
            version,
            last_weather_game_time: weather_synced_at,
            ctx,
            stop,
        })
    }

    /// The world this ticker drives.
    pub const fn world_id(&self) -> WorldId {
        self.world_id
    }

    /// Last event version assigned.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Simulated time added per advance.
    pub const fn game_time_delta(&self) -> Duration {
        self.game_time_delta
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Run the ticker until stopped, replaying `catch_up` first if given.
    pub async fn run(mut self, catch_up: Option<CatchUpPlan>) -> TickerOutcome {
        if let Some(plan) = catch_up {
            info!(
                world_id = %self.world_id,
                units = plan.units,
                missed_ms = duration_to_millis(plan.missed),
                "Catching up missed ticks"
            );
            let started = Instant::now();
            let engine = CatchUpEngine::new(self.ctx.clock.catch_up_yield_every);
            let report = engine.replay(&mut self, &plan).await;

            if report.pending > 0 {
                info!(
                    world_id = %self.world_id,
                    applied = report.applied,
                    pending = report.pending,
                    "Stopped during catch-up"
                );
                return TickerOutcome {
                    version: self.version,
                    pending_units: report.pending,
                };
            }

            self.finish_catch_up(&plan).await;
            info!(
                world_id = %self.world_id,
                applied = report.applied,
                elapsed_ms = duration_to_millis(started.elapsed()),
                "Catch-up complete"
            );
        }

        self.run_steady().await;
        TickerOutcome {
            version: self.version,
            pending_units: 0,
        }
    }

    /// Tick once per interval until stopped. The first tick fires one full
    /// interval after the loop starts.
    async fn run_steady(&mut self) {
        let period = self.ctx.clock.tick_interval();
        let now = Instant::now();
        let start = now.checked_add(period).unwrap_or(now);
        let mut timer = tokio::time::interval_at(start, period);
        let stop = Arc::clone(&self.stop);

        debug!(
            world_id = %self.world_id,
            tick_interval_ms = duration_to_millis(period),
            dilation_factor = self.dilation_factor,
            "Steady tick loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => break,
                _ = timer.tick() => self.advance(false).await,
            }
        }
    }

    /// Apply one tick: registry update, then every side effect.
    pub(crate) async fn advance(&mut self, catch_up: bool) {
        let delta = self.game_time_delta;
        let now = Utc::now();
        let updated = self.ctx.deps.registry.update_world(self.world_id, |world| {
            world.tick_count = world.tick_count.saturating_add(1);
            world.game_time = world.game_time.saturating_add(delta);
            world.last_tick_at = now;
            world.clone()
        });
        let state = match updated {
            Ok(state) => state,
            Err(e) => {
                warn!(world_id = %self.world_id, error = %e, "Failed to advance world clock");
                return;
            }
        };

        self.publish(&state).await;

        let details = WorldTickedDetails {
            tick_count: state.tick_count,
            game_time_ns: duration_to_nanos(state.game_time),
            tick_duration_ns: duration_to_nanos(delta),
            catch_up,
        };
        self.append(WorldEventType::Ticked, &details).await;

        self.sync_weather(state.game_time).await;

        debug!(
            world_id = %self.world_id,
            tick = state.tick_count,
            game_time_ms = duration_to_millis(state.game_time),
            catch_up,
            "Tick applied"
        );
    }

    async fn publish(&self, state: &WorldState) {
        let Some(broadcaster) = &self.ctx.deps.broadcaster else {
            return;
        };
        let snapshot = self.ctx.calendar.snapshot(state);
        let payload = match serde_json::to_vec(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(world_id = %self.world_id, error = %e, "Failed to encode tick snapshot");
                return;
            }
        };
        let topic = tick_topic(self.world_id);
        let limit = self.ctx.clock.side_effect_timeout();
        match timeout(limit, broadcaster.publish(&topic, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                world_id = %self.world_id,
                tick = state.tick_count,
                error = %e,
                "Failed to publish tick snapshot"
            ),
            Err(_) => warn!(
                world_id = %self.world_id,
                tick = state.tick_count,
                timeout_ms = duration_to_millis(limit),
                "Timed out publishing tick snapshot"
            ),
        }
    }

    /// Append a world event at the next version. The version advances even
    /// if the append fails. Returns whether the event was stored.
    async fn append<T: Serialize + Sync>(&mut self, event_type: WorldEventType, details: &T) -> bool {
        self.version = self.version.saturating_add(1);
        let event = match Event::world(self.world_id, event_type, self.version, details) {
            Ok(event) => event,
            Err(e) => {
                warn!(world_id = %self.world_id, %event_type, error = %e, "Failed to encode event");
                return false;
            }
        };

        let limit = self.ctx.clock.side_effect_timeout();
        match timeout(limit, self.ctx.deps.log.append_event(&event)).await {
            Ok(Ok(())) => {
                self.project(&event);
                true
            }
            Ok(Err(e)) => {
                warn!(
                    world_id = %self.world_id,
                    %event_type,
                    version = event.version,
                    error = %e,
                    "Failed to append event"
                );
                false
            }
            Err(_) => {
                warn!(
                    world_id = %self.world_id,
                    %event_type,
                    version = event.version,
                    timeout_ms = duration_to_millis(limit),
                    "Timed out appending event"
                );
                false
            }
        }
    }

    fn project(&self, event: &Event) {
        if let Some(projections) = &self.ctx.deps.projections {
            if let Err(e) = projections.project_event(event) {
                warn!(world_id = %self.world_id, error = %e, "Projection failed");
            }
        }
    }

    async fn sync_weather(&mut self, game_time: Duration) {
        let elapsed = game_time.saturating_sub(self.last_weather_game_time);
        if elapsed < self.ctx.clock.weather_interval() {
            return;
        }
        let Some(weather) = &self.ctx.deps.weather else {
            return;
        };
        // Rate limiting is by game time, so the marker moves even on failure.
        self.last_weather_game_time = game_time;
        let marked = self.ctx.deps.registry.update_world(self.world_id, |world| {
            world.weather_synced_at = game_time;
        });
        if let Err(e) = marked {
            warn!(world_id = %self.world_id, error = %e, "Failed to record weather marker");
        }

        let (season, _) = self.ctx.calendar.season(game_time);
        let at = synthetic_instant(self.ctx.clock.calendar_epoch, game_time);
        let limit = self.ctx.clock.side_effect_timeout();
        match timeout(limit, weather.update(self.world_id, at, season)).await {
            Ok(Ok(cells)) => debug!(
                world_id = %self.world_id,
                synthetic_time = %at,
                ?season,
                cells = cells.len(),
                "Weather updated"
            ),
            Ok(Err(e)) => warn!(world_id = %self.world_id, error = %e, "Weather update failed"),
            Err(_) => warn!(
                world_id = %self.world_id,
                timeout_ms = duration_to_millis(limit),
                "Timed out updating weather"
            ),
        }
    }

    /// Mark a fully replayed world as running and record the resume.
    async fn finish_catch_up(&mut self, plan: &CatchUpPlan) {
        let marked = self.ctx.deps.registry.update_world(self.world_id, |world| {
            if world.status == WorldStatus::CatchingUp {
                world.status = WorldStatus::Running;
            }
        });
        if let Err(e) = marked {
            warn!(world_id = %self.world_id, error = %e, "Failed to mark world running");
        }

        let details = WorldResumedDetails {
            replayed_units: plan.units,
            missed_real_ms: duration_to_millis(plan.missed),
        };
        self.append(WorldEventType::Resumed, &details).await;
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("world_id", &self.world_id)
            .field("dilation_factor", &self.dilation_factor)
            .field("game_time_delta", &self.game_time_delta)
            .field("version", &self.version)
            .field("last_weather_game_time", &self.last_weather_game_time)
            .finish_non_exhaustive()
    }
}
