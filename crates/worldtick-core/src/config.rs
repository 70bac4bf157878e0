//! Configuration loading and typed config structures for the Worldtick
//! engine.
//!
//! The canonical configuration lives in `worldtick-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, and a
//! loader that reads, overrides from the environment, and validates it.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use worldtick_types::WorldId;

/// Seconds in one simulated hour.
const SECS_PER_HOUR: u64 = 3_600;

/// Seconds in one simulated day.
const SECS_PER_DAY: u64 = 86_400;

/// Seconds in one simulated minute.
const SECS_PER_MINUTE: u64 = 60;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `worldtick-config.yaml`. Every section has
/// defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Clock cadence and calendar settings.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Infrastructure connection strings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Worlds whose tickers are spawned at startup.
    #[serde(default)]
    pub worlds: Vec<WorldConfig>,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for infrastructure:
    /// - `NATS_URL` overrides `infrastructure.nats_url`
    /// - `DATABASE_URL` overrides `infrastructure.postgres_url`
    /// - `WEATHER_SUBJECT` overrides `infrastructure.weather_subject`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.infrastructure.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        for world in &self.worlds {
            if !(world.dilation_factor.is_finite() && world.dilation_factor > 0.0) {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "world {} has non-positive dilation_factor {}",
                        world.name, world.dilation_factor
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Clock cadence, calendar, and catch-up configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Real-time milliseconds between steady-state ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Length of one simulated day in simulated hours.
    #[serde(default = "default_day_length_hours")]
    pub day_length_hours: u64,

    /// Length of one season in simulated days. A year is four seasons.
    #[serde(default = "default_season_length_days")]
    pub season_length_days: u64,

    /// Simulated minutes between weather collaborator invocations.
    #[serde(default = "default_weather_interval_minutes")]
    pub weather_interval_minutes: u64,

    /// Replayed units between cooperative yields during catch-up.
    #[serde(default = "default_catch_up_yield_every")]
    pub catch_up_yield_every: u64,

    /// Upper bound on each publish, append, or weather call.
    #[serde(default = "default_side_effect_timeout_ms")]
    pub side_effect_timeout_ms: u64,

    /// Append a `world.created` event when a spawn resumes an existing world.
    #[serde(default = "default_true")]
    pub emit_created_on_resume: bool,

    /// Real-world instant that game time zero maps to when synthesizing the
    /// weather collaborator's timestamp.
    #[serde(default = "default_calendar_epoch")]
    pub calendar_epoch: DateTime<Utc>,
}

impl ClockConfig {
    /// Real-time duration of one tick.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Simulated duration of one day.
    pub fn day_length(&self) -> Duration {
        Duration::from_secs(self.day_length_hours.saturating_mul(SECS_PER_HOUR))
    }

    /// Simulated duration of one season.
    pub fn season_length(&self) -> Duration {
        Duration::from_secs(self.season_length_days.saturating_mul(SECS_PER_DAY))
    }

    /// Simulated time that must accumulate between weather invocations.
    pub fn weather_interval(&self) -> Duration {
        Duration::from_secs(self.weather_interval_minutes.saturating_mul(SECS_PER_MINUTE))
    }

    /// Upper bound on a single side-effect call.
    pub const fn side_effect_timeout(&self) -> Duration {
        Duration::from_millis(self.side_effect_timeout_ms)
    }

    /// Check for zero-length intervals.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_field = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("day_length_hours", self.day_length_hours),
            ("season_length_days", self.season_length_days),
            ("weather_interval_minutes", self.weather_interval_minutes),
            ("catch_up_yield_every", self.catch_up_yield_every),
            ("side_effect_timeout_ms", self.side_effect_timeout_ms),
        ]
        .into_iter()
        .find(|&(_, value)| value == 0);

        match zero_field {
            Some((name, _)) => Err(ConfigError::Invalid {
                reason: format!("clock.{name} must be at least 1"),
            }),
            None => Ok(()),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            day_length_hours: default_day_length_hours(),
            season_length_days: default_season_length_days(),
            weather_interval_minutes: default_weather_interval_minutes(),
            catch_up_yield_every: default_catch_up_yield_every(),
            side_effect_timeout_ms: default_side_effect_timeout_ms(),
            emit_created_on_resume: true,
            calendar_epoch: default_calendar_epoch(),
        }
    }
}

/// Infrastructure connection settings. Every collaborator is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS URL for tick broadcasts. Broadcasting is disabled when unset.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// `PostgreSQL` connection string. The in-memory log is used when unset.
    #[serde(default)]
    pub postgres_url: Option<String>,

    /// NATS request subject of the weather collaborator. Weather
    /// synchronization is disabled when unset.
    #[serde(default)]
    pub weather_subject: Option<String>,
}

impl InfrastructureConfig {
    /// Override infrastructure settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = Some(val);
        }
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.postgres_url = Some(val);
        }
        if let Ok(val) = std::env::var("WEATHER_SUBJECT") {
            self.weather_subject = Some(val);
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error) used when
    /// `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// A world to spawn at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Stable world identifier; reuse it across restarts to resume.
    pub id: WorldId,
    /// Human-readable name.
    pub name: String,
    /// Simulated time per unit of real time.
    #[serde(default = "default_dilation_factor")]
    pub dilation_factor: f64,
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_day_length_hours() -> u64 {
    24
}

const fn default_season_length_days() -> u64 {
    90
}

const fn default_weather_interval_minutes() -> u64 {
    30
}

const fn default_catch_up_yield_every() -> u64 {
    64
}

const fn default_side_effect_timeout_ms() -> u64 {
    1_000
}

const fn default_true() -> bool {
    true
}

fn default_calendar_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_dilation_factor() -> f64 {
    1.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.clock.day_length(), Duration::from_secs(86_400));
        assert_eq!(
            config.clock.season_length(),
            Duration::from_secs(90 * 86_400)
        );
        assert_eq!(config.clock.weather_interval(), Duration::from_secs(1_800));
        assert!(config.clock.emit_created_on_resume);
        assert!(config.worlds.is_empty());
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config: EngineConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config.clock, ClockConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
clock:
  tick_interval_ms: 250
  day_length_hours: 12
  season_length_days: 30
  weather_interval_minutes: 15
  catch_up_yield_every: 8
  side_effect_timeout_ms: 500
  emit_created_on_resume: false
  calendar_epoch: "1990-06-01T00:00:00Z"

logging:
  level: debug
  format: json

worlds:
  - id: "01945c2a-3b4f-7def-8a12-bc34567890ab"
    name: "Aster"
    dilation_factor: 60.0
  - id: "01945c2a-3b4f-7def-8a12-bc34567890ac"
    name: "Bramble"
"#;
        let config: EngineConfig = serde_yml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.clock.day_length(), Duration::from_secs(12 * 3_600));
        assert!(!config.clock.emit_created_on_resume);
        assert_eq!(
            config.clock.calendar_epoch,
            Utc.with_ymd_and_hms(1990, 6, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.worlds.len(), 2);
        assert_eq!(config.worlds.first().map(|w| w.dilation_factor), Some(60.0));
        assert_eq!(config.worlds.get(1).map(|w| w.dilation_factor), Some(1.0));
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let clock = ClockConfig {
            tick_interval_ms: 0,
            ..ClockConfig::default()
        };
        let err = clock.validate().unwrap_err();
        assert!(err.to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn zero_catch_up_yield_is_rejected() {
        let clock = ClockConfig {
            catch_up_yield_every: 0,
            ..ClockConfig::default()
        };
        let err = clock.validate().unwrap_err();
        assert!(err.to_string().contains("catch_up_yield_every"));
    }

    #[test]
    fn non_positive_dilation_is_rejected() {
        let config = EngineConfig {
            worlds: vec![WorldConfig {
                id: WorldId::new(),
                name: "Frozen".to_owned(),
                dilation_factor: 0.0,
            }],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_yaml_is_a_yaml_error() {
        let result = EngineConfig::parse("clock: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
