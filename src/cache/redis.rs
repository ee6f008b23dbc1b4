use redis::{AsyncCommands, Client, RedisError};
use tracing::debug;

/// Channel prefix for live events relayed between nodes.
pub const LIVE_CHANNEL_PREFIX: &str = "live";

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub fn new(client: Client) -> Self {
        // Connection validation will happen on first use
        Self { client }
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    /// Publish a raw message, returning the number of subscribers that got it.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<usize, RedisError> {
        let receivers: usize = self
            .client
            .get_multiplexed_async_connection()
            .await?
            .publish(channel, message)
            .await?;
        debug!("Published to {} ({} receivers)", channel, receivers);
        Ok(receivers)
    }

    pub fn user_channel(user_id: &uuid::Uuid) -> String {
        format!("{}:user:{}", LIVE_CHANNEL_PREFIX, user_id)
    }

    pub fn device_channel(device_id: &str) -> String {
        format!("{}:device:{}", LIVE_CHANNEL_PREFIX, device_id)
    }

    pub fn live_pattern() -> String {
        format!("{}:*", LIVE_CHANNEL_PREFIX)
    }
}
