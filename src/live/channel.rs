use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::redis::RedisCache;

pub type ConnectionId = Uuid;

/// A typed event pushed to live connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event: String,
    pub data: serde_json::Value,
}

/// Relay envelope published to Redis so every node can deliver locally.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RelayedEvent {
    pub target: RelayTarget,
    pub event: LiveEvent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub(crate) enum RelayTarget {
    User(Uuid),
    Device(String),
}

/// Outbound side of one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    sender: mpsc::Sender<LiveEvent>,
}

impl Connection {
    pub fn new(sender: mpsc::Sender<LiveEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    fn deliver(&self, event: &LiveEvent) -> bool {
        match self.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Live connection {} is backed up, dropping event", self.id);
                false
            }
            // Closed a moment ago; the socket task will leave its groups.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Pub/sub over per-user and per-device connection groups.
///
/// Membership is read at emit time. Emits are best-effort: no retry and no
/// error when a group is empty.
#[derive(Debug, Default)]
pub struct LiveChannel {
    users: DashMap<Uuid, Vec<Connection>>,
    devices: DashMap<String, Vec<Connection>>,
    relay: Option<RedisCache>,
}

impl LiveChannel {
    pub fn new(relay: Option<RedisCache>) -> Self {
        Self {
            users: DashMap::new(),
            devices: DashMap::new(),
            relay,
        }
    }

    pub fn join_user_group(&self, connection: &Connection, user_id: Uuid) {
        self.users
            .entry(user_id)
            .or_default()
            .push(connection.clone());
    }

    pub fn join_device_group(&self, connection: &Connection, device_id: &str) {
        self.devices
            .entry(device_id.to_string())
            .or_default()
            .push(connection.clone());
    }

    /// Remove a connection from every group it joined.
    pub fn leave(&self, connection_id: ConnectionId) {
        for mut group in self.users.iter_mut() {
            group.retain(|c| c.id != connection_id);
        }
        self.users.retain(|_, group| !group.is_empty());

        for mut group in self.devices.iter_mut() {
            group.retain(|c| c.id != connection_id);
        }
        self.devices.retain(|_, group| !group.is_empty());
    }

    pub async fn emit_to_users<T: Serialize>(&self, user_ids: &[Uuid], event: &str, payload: &T) {
        let Some(event) = build_event(event, payload) else {
            return;
        };

        for user_id in user_ids {
            match &self.relay {
                Some(cache) => {
                    self.publish(
                        cache,
                        &RedisCache::user_channel(user_id),
                        RelayTarget::User(*user_id),
                        &event,
                    )
                    .await
                }
                None => {
                    self.deliver_to_user(*user_id, &event);
                }
            }
        }
    }

    pub async fn emit_to_device<T: Serialize>(&self, device_id: &str, event: &str, payload: &T) {
        let Some(event) = build_event(event, payload) else {
            return;
        };

        match &self.relay {
            Some(cache) => {
                self.publish(
                    cache,
                    &RedisCache::device_channel(device_id),
                    RelayTarget::Device(device_id.to_string()),
                    &event,
                )
                .await
            }
            None => {
                self.deliver_to_device(device_id, &event);
            }
        }
    }

    /// Deliver to this node's connections for `user_id`; returns how many took it.
    pub fn deliver_to_user(&self, user_id: Uuid, event: &LiveEvent) -> usize {
        // Clone the group so no shard lock is held while sending
        let connections = self
            .users
            .get(&user_id)
            .map(|group| group.value().clone())
            .unwrap_or_default();
        let delivered = connections.iter().filter(|c| c.deliver(event)).count();
        debug!(
            "Event '{}' reached {} connection(s) of user {}",
            event.event, delivered, user_id
        );
        delivered
    }

    pub fn deliver_to_device(&self, device_id: &str, event: &LiveEvent) -> usize {
        let connections = self
            .devices
            .get(device_id)
            .map(|group| group.value().clone())
            .unwrap_or_default();
        connections.iter().filter(|c| c.deliver(event)).count()
    }

    pub(crate) fn deliver_relayed(&self, relayed: RelayedEvent) -> usize {
        match relayed.target {
            RelayTarget::User(user_id) => self.deliver_to_user(user_id, &relayed.event),
            RelayTarget::Device(device_id) => self.deliver_to_device(&device_id, &relayed.event),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|group| group.len()).sum()
    }

    async fn publish(
        &self,
        cache: &RedisCache,
        channel: &str,
        target: RelayTarget,
        event: &LiveEvent,
    ) {
        let relayed = RelayedEvent {
            target,
            event: event.clone(),
        };
        let json = match serde_json::to_string(&relayed) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode relayed event: {}", e);
                return;
            }
        };

        if let Err(e) = cache.publish(channel, &json).await {
            // Fall back to local delivery so single-node setups keep working
            warn!("Redis publish to {} failed: {}", channel, e);
            self.deliver_relayed(relayed);
        }
    }
}

fn build_event<T: Serialize>(event: &str, payload: &T) -> Option<LiveEvent> {
    match serde_json::to_value(payload) {
        Ok(data) => Some(LiveEvent {
            event: event.to_string(),
            data,
        }),
        Err(e) => {
            error!("Failed to encode live event '{}': {}", event, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connection() -> (Connection, mpsc::Receiver<LiveEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(tx), rx)
    }

    #[tokio::test]
    async fn test_emit_reaches_every_connection_of_the_user() {
        let live = LiveChannel::new(None);
        let user = Uuid::new_v4();
        let (phone, mut phone_rx) = connection();
        let (laptop, mut laptop_rx) = connection();
        live.join_user_group(&phone, user);
        live.join_user_group(&laptop, user);

        live.emit_to_users(&[user], "ping", &json!({"n": 1})).await;

        let expected = LiveEvent {
            event: "ping".into(),
            data: json!({"n": 1}),
        };
        assert_eq!(phone_rx.try_recv().unwrap(), expected);
        assert_eq!(laptop_rx.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_emit_to_user_without_connections_is_noop() {
        let live = LiveChannel::new(None);
        live.emit_to_users(&[Uuid::new_v4()], "ping", &json!({}))
            .await;
        assert_eq!(live.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_removes_connection_from_all_groups() {
        let live = LiveChannel::new(None);
        let user = Uuid::new_v4();
        let (conn, mut rx) = connection();
        live.join_user_group(&conn, user);
        live.join_device_group(&conn, "device-a");

        live.leave(conn.id);
        live.emit_to_users(&[user], "ping", &json!({})).await;
        live.emit_to_device("device-a", "signed_out", &json!({}))
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(live.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_device_events_stay_on_the_device() {
        let live = LiveChannel::new(None);
        let user = Uuid::new_v4();
        let (tab_a, mut rx_a) = connection();
        let (tab_b, mut rx_b) = connection();
        live.join_user_group(&tab_a, user);
        live.join_user_group(&tab_b, user);
        live.join_device_group(&tab_a, "device-a");
        live.join_device_group(&tab_b, "device-b");

        live.emit_to_device("device-a", "signed_out", &json!({}))
            .await;

        assert_eq!(rx_a.try_recv().unwrap().event, "signed_out");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_closed_connection_is_a_harmless_miss() {
        let live = LiveChannel::new(None);
        let user = Uuid::new_v4();
        let (conn, rx) = connection();
        live.join_user_group(&conn, user);
        drop(rx);

        let event = LiveEvent {
            event: "ping".into(),
            data: json!(null),
        };
        assert_eq!(live.deliver_to_user(user, &event), 0);
    }

    #[test]
    fn test_relay_envelope_shape() {
        let user = Uuid::nil();
        let relayed = RelayedEvent {
            target: RelayTarget::User(user),
            event: LiveEvent {
                event: "notification:new".into(),
                data: json!({"id": 1}),
            },
        };
        let json = serde_json::to_value(&relayed).unwrap();
        assert_eq!(json["target"]["kind"], "user");
        assert_eq!(json["event"]["event"], "notification:new");
    }
}
