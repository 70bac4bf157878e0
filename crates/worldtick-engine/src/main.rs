//! Engine binary for Worldtick.
//!
//! Wires the ticker manager to its collaborators and runs every configured
//! world's clock until the process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `worldtick-config.yaml` (or `WORLDTICK_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the event log: `PostgreSQL` if configured, in-memory otherwise
//! 4. Connect to NATS for snapshot broadcast and weather requests
//! 5. Rebuild the world timeline read model from the log
//! 6. Spawn a ticker per configured world
//! 7. On Ctrl-C, stop every ticker so each world is left paused

mod error;
mod nats_broadcast;
mod nats_weather;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use worldtick_core::config::LoggingConfig;
use worldtick_core::{
    EngineConfig, LogFormat, TickerDeps, TickerManager, WorldClockRegistry,
    WorldTimelineProjection,
};
use worldtick_db::PostgresPool;
use worldtick_events::{
    EventLog, InMemoryEventLog, Projection, ProjectionDispatcher, ReplayEngine,
};

use crate::error::EngineError;
use crate::nats_broadcast::NatsBroadcaster;
use crate::nats_weather::NatsWeatherClient;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "worldtick-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step fails or a ticker cannot be
/// spawned.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        tick_interval_ms = config.clock.tick_interval_ms,
        day_length_hours = config.clock.day_length_hours,
        season_length_days = config.clock.season_length_days,
        worlds = config.worlds.len(),
        "worldtick-engine starting"
    );

    // 3. Open the event log.
    let (log, pool): (Arc<dyn EventLog>, Option<PostgresPool>) =
        match &config.infrastructure.postgres_url {
            Some(url) => {
                let pool = PostgresPool::connect_url(url)
                    .await
                    .map_err(EngineError::from)?;
                pool.run_migrations().await.map_err(EngineError::from)?;
                info!("PostgreSQL event log ready");
                let log: Arc<dyn EventLog> = Arc::new(pool.event_log());
                (log, Some(pool))
            }
            None => {
                warn!("No postgres_url configured, events are kept in memory only");
                let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
                (log, None)
            }
        };

    // 4. Connect to NATS.
    let nats = match &config.infrastructure.nats_url {
        Some(url) => {
            info!(nats_url = url.as_str(), "Connecting to NATS");
            let client = async_nats::connect(url.as_str())
                .await
                .map_err(|e| EngineError::Nats {
                    message: format!("failed to connect to NATS at {url}: {e}"),
                })?;
            info!("NATS connected");
            Some(client)
        }
        None => {
            info!("No nats_url configured, snapshots and weather disabled");
            None
        }
    };

    // 5. Rebuild read models.
    let timeline = Arc::new(WorldTimelineProjection::new());
    let mut dispatcher = ProjectionDispatcher::new();
    dispatcher.register_projection(Arc::clone(&timeline) as Arc<dyn Projection>);
    let replay = ReplayEngine::new(Arc::clone(&log));
    for world in &config.worlds {
        let applied = replay
            .rebuild(&world.id.to_string(), &dispatcher)
            .await
            .map_err(EngineError::from)?;
        if applied > 0 {
            info!(world_id = %world.id, events = applied, "World history replayed");
        }
    }

    // 6. Assemble the manager and spawn worlds.
    let registry = Arc::new(WorldClockRegistry::new());
    let mut deps = TickerDeps::new(Arc::clone(&registry), Arc::clone(&log))
        .with_projections(Arc::new(dispatcher));
    if let Some(client) = &nats {
        deps = deps.with_broadcaster(Arc::new(NatsBroadcaster::new(client.clone())));
        if let Some(subject) = &config.infrastructure.weather_subject {
            info!(subject = subject.as_str(), "Weather collaborator enabled");
            deps = deps.with_weather(Arc::new(NatsWeatherClient::new(
                client.clone(),
                subject.as_str(),
            )));
        }
    }
    let manager = TickerManager::new(config.clock.clone(), deps).map_err(EngineError::from)?;

    for world in &config.worlds {
        manager
            .spawn_ticker(world.id, &world.name, world.dilation_factor)
            .await
            .map_err(EngineError::from)?;
    }
    info!(active = manager.active_worlds().len(), "All tickers running");

    // 7. Run until interrupted.
    tokio::signal::ctrl_c().await.map_err(EngineError::from)?;
    info!("Shutdown signal received");

    let stopped = manager.stop_all().await;
    for world in &config.worlds {
        if let Some(summary) = timeline.timeline(world.id) {
            info!(
                world_id = %world.id,
                name = summary.name.as_str(),
                tick_count = summary.tick_count,
                game_time_ms = u64::try_from(summary.game_time.as_millis()).unwrap_or(u64::MAX),
                last_version = summary.last_version,
                "World paused"
            );
        }
    }

    if let Some(client) = nats {
        if let Err(e) = client.flush().await {
            warn!(error = %e, "Failed to flush NATS before exit");
        }
    }
    if let Some(pool) = pool {
        pool.close().await;
    }

    info!(stopped, "worldtick-engine shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Load the engine configuration.
///
/// Reads `WORLDTICK_CONFIG` if set, otherwise `worldtick-config.yaml` in
/// the working directory. A missing file yields the defaults, still subject
/// to environment overrides.
fn load_config() -> Result<EngineConfig, EngineError> {
    let path = std::env::var_os("WORLDTICK_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(EngineConfig::from_file(&path)?)
    } else {
        let mut config = EngineConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}
