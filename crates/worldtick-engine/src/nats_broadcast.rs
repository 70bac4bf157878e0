//! NATS publisher for tick snapshots.
//!
//! Each snapshot is published on the world's topic
//! (`world.{world_id}.tick`) as a NATS subject. Delivery is fire-and-forget:
//! the client buffers outgoing messages and no flush is awaited per tick.

use async_trait::async_trait;
use worldtick_core::{BroadcastError, Broadcaster};

/// A [`Broadcaster`] backed by a NATS connection.
#[derive(Debug, Clone)]
pub struct NatsBroadcaster {
    client: async_nats::Client,
}

impl NatsBroadcaster {
    /// Create a broadcaster from a connected client.
    pub const fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Broadcaster for NatsBroadcaster {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BroadcastError> {
        self.client
            .publish(topic.to_owned(), payload.to_vec().into())
            .await
            .map_err(|e| BroadcastError::Publish {
                topic: topic.to_owned(),
                message: e.to_string(),
            })
    }
}
