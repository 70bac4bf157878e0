//! NATS request/reply client for the weather collaborator.
//!
//! # Wire format
//!
//! Request body (JSON):
//!
//! ```json
//! {"world_id": "...", "synthetic_time": "2000-01-01T00:30:00Z", "season": "Spring"}
//! ```
//!
//! Reply body (JSON): an object mapping cell ids to an optional narrative
//! line, e.g. `{"cell-7": "Rain sweeps the valley.", "cell-8": null}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use worldtick_core::{WeatherCollaborator, WeatherError, WeatherUpdate};
use worldtick_types::{Season, WorldId};

/// Body of a weather request.
#[derive(Debug, Clone, Serialize)]
struct WeatherRequest {
    world_id: WorldId,
    synthetic_time: DateTime<Utc>,
    season: Season,
}

/// A [`WeatherCollaborator`] reached over NATS request/reply.
#[derive(Debug, Clone)]
pub struct NatsWeatherClient {
    client: async_nats::Client,
    subject: String,
}

impl NatsWeatherClient {
    /// Create a client sending requests on `subject`.
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl WeatherCollaborator for NatsWeatherClient {
    async fn update(
        &self,
        world_id: WorldId,
        synthetic_time: DateTime<Utc>,
        season: Season,
    ) -> Result<WeatherUpdate, WeatherError> {
        let body = serde_json::to_vec(&WeatherRequest {
            world_id,
            synthetic_time,
            season,
        })?;

        let reply = self
            .client
            .request(self.subject.clone(), body.into())
            .await
            .map_err(|e| WeatherError::Request {
                message: format!("request on {} failed: {e}", self.subject),
            })?;

        let cells: WeatherUpdate = serde_json::from_slice(&reply.payload)?;
        debug!(%world_id, cells = cells.len(), "Weather reply received");
        Ok(cells)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn request_body_shape() {
        let world_id = WorldId::new();
        let request = WeatherRequest {
            world_id,
            synthetic_time: Utc.with_ymd_and_hms(2000, 1, 1, 0, 30, 0).unwrap(),
            season: Season::Spring,
        };
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["world_id"], world_id.to_string());
        assert_eq!(json["synthetic_time"], "2000-01-01T00:30:00Z");
        assert_eq!(json["season"], "Spring");
    }

    #[test]
    fn reply_allows_missing_narratives() {
        let reply = br#"{"cell-7": "Rain sweeps the valley.", "cell-8": null}"#;
        let cells: WeatherUpdate = serde_json::from_slice(reply).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(
            cells.get("cell-7").cloned().flatten().as_deref(),
            Some("Rain sweeps the valley.")
        );
        assert_eq!(cells.get("cell-8"), Some(&None));
    }
}
