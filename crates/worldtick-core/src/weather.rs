//! Weather collaborator contract.
//!
//! The ticker invokes the collaborator whenever at least one weather
//! interval of simulated time has accumulated since the previous call, so
//! faster worlds call it more often per real second.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use worldtick_types::{Season, WorldId};

/// Narrative updates keyed by cell id. `None` means the cell changed
/// without a narrative line.
pub type WeatherUpdate = HashMap<String, Option<String>>;

/// Errors returned by a [`WeatherCollaborator`].
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    /// The collaborator could not be reached or failed to answer.
    #[error("weather request failed: {message}")]
    Request {
        /// Transport-specific failure description.
        message: String,
    },

    /// The request or reply body could not be (de)serialized.
    #[error("invalid weather payload: {source}")]
    Payload {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// External service that advances a world's weather.
#[async_trait]
pub trait WeatherCollaborator: Send + Sync {
    /// Advance weather for `world_id` to `synthetic_time` in `season`.
    async fn update(
        &self,
        world_id: WorldId,
        synthetic_time: DateTime<Utc>,
        season: Season,
    ) -> Result<WeatherUpdate, WeatherError>;
}
