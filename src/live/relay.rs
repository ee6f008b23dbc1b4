use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::redis::RedisCache;
use crate::live::channel::{LiveChannel, RelayedEvent};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Forward live events published by any node to this node's connections.
///
/// Runs until the process exits, resubscribing after connection loss.
pub async fn run_relay(live: Arc<LiveChannel>, cache: RedisCache) {
    let pattern = RedisCache::live_pattern();

    loop {
        match cache.get_client().get_async_pubsub().await {
            Ok(mut pubsub) => {
                if let Err(e) = pubsub.psubscribe(&pattern).await {
                    error!("Failed to subscribe to Redis pattern {}: {}", pattern, e);
                } else {
                    info!("Live relay subscribed to {}", pattern);
                    let mut messages = pubsub.on_message();

                    while let Some(msg) = messages.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                error!("Failed to get message payload: {}", e);
                                continue;
                            }
                        };

                        match serde_json::from_str::<RelayedEvent>(&payload) {
                            Ok(relayed) => {
                                live.deliver_relayed(relayed);
                            }
                            Err(e) => warn!(
                                "Dropping malformed relay message on {}: {}",
                                msg.get_channel_name(),
                                e
                            ),
                        }
                    }
                    warn!("Live relay subscription ended");
                }
            }
            Err(e) => error!("Failed to get Redis PubSub connection: {}", e),
        }

        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}
