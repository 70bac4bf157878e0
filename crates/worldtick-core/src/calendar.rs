//! Calendar derivations from simulated time.
//!
//! Time of day, sun position, season, and season progress are computed
//! from the world's `game_time` alone -- never stored independently. Game
//! time is the source of truth.
//!
//! A simulated year is four equal seasons starting with Spring at game
//! time zero. Within a day, the sun position is the elapsed fraction of the
//! day and maps to a [`TimeOfDay`] through a fixed threshold table.

use std::time::Duration;

use chrono::{DateTime, Utc};
use worldtick_types::{Season, TickSnapshot, TimeOfDay, WorldState, duration_to_millis};

use crate::config::ClockConfig;

/// Number of seasons in a simulated year.
const SEASONS_PER_YEAR: u32 = 4;

/// Upper bounds (exclusive) of each time-of-day phase, in ascending order.
/// Sun positions at or above the last bound wrap to [`TimeOfDay::Night`].
const TIME_OF_DAY_THRESHOLDS: [(f64, TimeOfDay); 7] = [
    (0.25, TimeOfDay::Night),
    (0.30, TimeOfDay::Dawn),
    (0.45, TimeOfDay::Morning),
    (0.55, TimeOfDay::Noon),
    (0.75, TimeOfDay::Afternoon),
    (0.80, TimeOfDay::Dusk),
    (0.90, TimeOfDay::Evening),
];

/// Errors that can occur when building a calendar.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    /// A day or season length is zero.
    #[error("invalid calendar: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong.
        reason: String,
    },
}

/// Day and season lengths used to derive calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    day_length: Duration,
    season_length: Duration,
}

impl Calendar {
    /// Create a calendar from explicit lengths.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::InvalidConfig`] if either length is zero.
    pub fn new(day_length: Duration, season_length: Duration) -> Result<Self, CalendarError> {
        if day_length.is_zero() {
            return Err(CalendarError::InvalidConfig {
                reason: "day length must be positive".to_owned(),
            });
        }
        if season_length.is_zero() {
            return Err(CalendarError::InvalidConfig {
                reason: "season length must be positive".to_owned(),
            });
        }
        Ok(Self {
            day_length,
            season_length,
        })
    }

    /// Create a calendar from the clock configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::InvalidConfig`] if either length is zero.
    pub fn from_config(config: &ClockConfig) -> Result<Self, CalendarError> {
        Self::new(config.day_length(), config.season_length())
    }

    /// Simulated length of one day.
    pub const fn day_length(&self) -> Duration {
        self.day_length
    }

    /// Simulated length of one season.
    pub const fn season_length(&self) -> Duration {
        self.season_length
    }

    /// Simulated length of one year (four seasons).
    pub const fn year_length(&self) -> Duration {
        self.season_length.saturating_mul(SEASONS_PER_YEAR)
    }

    /// Elapsed fraction of the current day, in `[0, 1)`.
    pub fn sun_position(&self, game_time: Duration) -> f64 {
        cycle_fraction(game_time.as_nanos(), self.day_length.as_nanos())
    }

    /// Time of day at the given game time.
    pub fn time_of_day(&self, game_time: Duration) -> TimeOfDay {
        time_of_day_at(self.sun_position(game_time))
    }

    /// Current season and the elapsed fraction of it, in `[0, 1)`.
    pub fn season(&self, game_time: Duration) -> (Season, f64) {
        let season_nanos = self.season_length.as_nanos();
        let year_nanos = season_nanos.saturating_mul(u128::from(SEASONS_PER_YEAR));
        let into_year = game_time.as_nanos().checked_rem(year_nanos).unwrap_or(0);
        let index = into_year.checked_div(season_nanos).unwrap_or(0);
        let season = usize::try_from(index)
            .ok()
            .and_then(|i| Season::ALL.get(i).copied())
            .unwrap_or(Season::Spring);
        (season, cycle_fraction(into_year, season_nanos))
    }

    /// Build the broadcast snapshot for a world's current state.
    pub fn snapshot(&self, state: &WorldState) -> TickSnapshot {
        let sun_position = self.sun_position(state.game_time);
        let (current_season, season_progress) = self.season(state.game_time);
        TickSnapshot {
            world_id: state.id,
            tick_number: state.tick_count,
            game_time_ms: duration_to_millis(state.game_time),
            real_time_ms: state.last_tick_at.timestamp_millis(),
            dilation_factor: state.dilation_factor,
            time_of_day: time_of_day_at(sun_position),
            sun_position,
            current_season,
            season_progress,
        }
    }
}

/// Map a sun position to a time of day using the fixed threshold table.
pub fn time_of_day_at(sun_position: f64) -> TimeOfDay {
    TIME_OF_DAY_THRESHOLDS
        .iter()
        .find(|&&(bound, _)| sun_position < bound)
        .map_or(TimeOfDay::Night, |&(_, phase)| phase)
}

/// Real-world-looking instant for a game time, anchored at `epoch`.
///
/// Saturates at the latest representable instant.
pub fn synthetic_instant(epoch: DateTime<Utc>, game_time: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(game_time)
        .ok()
        .and_then(|offset| epoch.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `(value mod period) / period` as a float in `[0, 1)`.
#[allow(clippy::cast_precision_loss)]
fn cycle_fraction(value: u128, period: u128) -> f64 {
    let Some(rem) = value.checked_rem(period) else {
        return 0.0;
    };
    let fraction = rem as f64 / period as f64;
    // Rounding can push values a hair below `period` up to 1.0.
    if fraction >= 1.0 { 0.0 } else { fraction }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chrono::TimeZone;
    use worldtick_types::WorldId;

    use super::*;

    const HOUR: Duration = Duration::from_secs(3_600);
    const DAY: Duration = Duration::from_secs(86_400);

    fn calendar() -> Calendar {
        Calendar::new(DAY, DAY.saturating_mul(90)).unwrap()
    }

    #[test]
    fn zero_lengths_are_rejected() {
        assert!(Calendar::new(Duration::ZERO, DAY).is_err());
        assert!(Calendar::new(DAY, Duration::ZERO).is_err());
    }

    #[test]
    fn from_default_config() {
        let cal = Calendar::from_config(&ClockConfig::default()).unwrap();
        assert_eq!(cal, calendar());
        assert_eq!(cal.year_length(), DAY.saturating_mul(360));
    }

    #[test]
    fn midday_is_noon() {
        let cal = calendar();
        assert_eq!(cal.sun_position(HOUR.saturating_mul(12)), 0.5);
        assert_eq!(cal.time_of_day(HOUR.saturating_mul(12)), TimeOfDay::Noon);
    }

    #[test]
    fn sun_position_increases_within_day_and_wraps() {
        let cal = calendar();
        let mut previous = -1.0;
        for minutes in 0..(24 * 60) {
            let t = Duration::from_secs(minutes * 60);
            let sun = cal.sun_position(t);
            assert!((0.0..1.0).contains(&sun));
            assert!(sun > previous, "sun position must increase at minute {minutes}");
            previous = sun;
        }
        assert_eq!(cal.sun_position(DAY), 0.0);
        assert_eq!(
            cal.sun_position(DAY.saturating_mul(3).saturating_add(HOUR.saturating_mul(6))),
            0.25
        );
    }

    #[test]
    fn threshold_table_is_exact() {
        let cases = [
            (0.0, TimeOfDay::Night),
            (0.249, TimeOfDay::Night),
            (0.25, TimeOfDay::Dawn),
            (0.299, TimeOfDay::Dawn),
            (0.30, TimeOfDay::Morning),
            (0.45, TimeOfDay::Noon),
            (0.50, TimeOfDay::Noon),
            (0.55, TimeOfDay::Afternoon),
            (0.75, TimeOfDay::Dusk),
            (0.80, TimeOfDay::Evening),
            (0.899, TimeOfDay::Evening),
            (0.90, TimeOfDay::Night),
            (0.999, TimeOfDay::Night),
        ];
        for (sun, expected) in cases {
            assert_eq!(time_of_day_at(sun), expected, "sun position {sun}");
        }
    }

    #[test]
    fn seasons_rotate_every_ninety_days() {
        let cal = calendar();
        let season_len = DAY.saturating_mul(90);
        assert_eq!(cal.season(Duration::ZERO), (Season::Spring, 0.0));

        let (season, progress) = cal.season(DAY.saturating_mul(45));
        assert_eq!(season, Season::Spring);
        assert_eq!(progress, 0.5);

        assert_eq!(cal.season(season_len).0, Season::Summer);
        assert_eq!(cal.season(season_len.saturating_mul(2)).0, Season::Autumn);
        assert_eq!(cal.season(season_len.saturating_mul(3)).0, Season::Winter);
        // Year wraps back to spring.
        assert_eq!(cal.season(season_len.saturating_mul(4)), (Season::Spring, 0.0));
    }

    #[test]
    fn snapshot_derives_calendar_fields() {
        let cal = calendar();
        let mut state = WorldState::new(WorldId::new(), "Aster", 10.0);
        state.tick_count = 7;
        state.game_time = DAY.saturating_mul(91).saturating_add(HOUR.saturating_mul(12));

        let snap = cal.snapshot(&state);
        assert_eq!(snap.world_id, state.id);
        assert_eq!(snap.tick_number, 7);
        assert_eq!(snap.game_time_ms, duration_to_millis(state.game_time));
        assert_eq!(snap.dilation_factor, 10.0);
        assert_eq!(snap.time_of_day, TimeOfDay::Noon);
        assert_eq!(snap.sun_position, 0.5);
        assert_eq!(snap.current_season, Season::Summer);
        assert!(snap.season_progress > 0.0 && snap.season_progress < 0.1);
        assert_eq!(snap.real_time_ms, state.last_tick_at.timestamp_millis());
    }

    #[test]
    fn synthetic_instant_offsets_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let at = synthetic_instant(epoch, DAY.saturating_add(HOUR));
        assert_eq!(at, Utc.with_ymd_and_hms(2000, 1, 2, 1, 0, 0).unwrap());
        assert_eq!(synthetic_instant(epoch, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
