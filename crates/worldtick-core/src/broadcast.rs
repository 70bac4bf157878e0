//! Outbound publication of tick snapshots.
//!
//! The [`Broadcaster`] is best-effort: the ticker logs and absorbs every
//! publish failure, and no implementation retries internally.

use async_trait::async_trait;
use tokio::sync::broadcast;
use worldtick_types::WorldId;

/// Capacity of the in-process broadcast channel.
///
/// A subscriber that falls behind by more than this many messages receives
/// [`broadcast::error::RecvError::Lagged`] and skips to the newest message.
const CHANNEL_CAPACITY: usize = 256;

/// Errors returned by a [`Broadcaster`].
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The transport rejected or failed to deliver the message.
    #[error("publish to {topic} failed: {message}")]
    Publish {
        /// Topic the message was addressed to.
        topic: String,
        /// Transport-specific failure description.
        message: String,
    },

    /// The snapshot could not be encoded.
    #[error("failed to encode snapshot: {source}")]
    Encode {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Publishes opaque payloads to named topics.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BroadcastError>;
}

/// Deterministic per-world topic for tick snapshots.
pub fn tick_topic(world_id: WorldId) -> String {
    format!("world.{world_id}.tick")
}

/// A message delivered through a [`ChannelBroadcaster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Topic the payload was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// In-process broadcaster backed by a [`tokio::sync::broadcast`] channel.
///
/// Publishing with no subscribers succeeds and drops the message.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Published>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BroadcastError> {
        let message = Published {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        };
        // A send error only means nobody is listening.
        if self.tx.send(message).is_err() {
            tracing::trace!(topic, "No subscribers for broadcast");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topic_embeds_world_id() {
        let id = WorldId::new();
        assert_eq!(tick_topic(id), format!("world.{id}.tick"));
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let broadcaster = ChannelBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.publish("world.a.tick", b"{}").await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "world.a.tick");
        assert_eq!(received.payload, b"{}".to_vec());
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let broadcaster = ChannelBroadcaster::default();
        assert!(broadcaster.publish("world.a.tick", b"x").await.is_ok());
    }
}
