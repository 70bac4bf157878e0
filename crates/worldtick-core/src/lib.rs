//! World clocks for the Worldtick engine.
//!
//! Each world runs its own simulated clock, paced by a fixed real-time tick
//! interval and scaled by a dilation factor. This crate provides:
//!
//! - [`config`]: the YAML configuration model
//! - [`calendar`]: time of day and season derived from game time
//! - [`registry`]: the process-wide table of world clock state
//! - [`ticker`]: the per-world driver and its side effects
//! - [`catchup`]: replay of ticks missed while a world was paused
//! - [`manager`]: spawn, stop, and status of the active tickers
//! - [`timeline`]: a world read model and restoration from the event log
//! - [`broadcast`] and [`weather`]: the outbound collaborator contracts

pub mod broadcast;
pub mod calendar;
pub mod catchup;
pub mod config;
pub mod manager;
pub mod registry;
pub mod ticker;
pub mod timeline;
pub mod weather;

pub use broadcast::{BroadcastError, Broadcaster, ChannelBroadcaster, Published, tick_topic};
pub use calendar::{Calendar, CalendarError};
pub use catchup::{CatchUpEngine, CatchUpPlan, CatchUpReport};
pub use config::{ClockConfig, ConfigError, EngineConfig, LogFormat};
pub use manager::{TickerError, TickerManager, TickerStatus};
pub use registry::{RegistryError, WorldClockRegistry};
pub use ticker::{StopSignal, Ticker, TickerDeps};
pub use timeline::{WorldTimeline, WorldTimelineProjection, restore_world_state};
pub use weather::{WeatherCollaborator, WeatherError, WeatherUpdate};
