use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Tracks which users currently hold at least one live connection.
///
/// Counts are per process and start empty, so after a restart everyone is
/// offline until they reconnect. With the Redis relay on, a user connected
/// only to another node is offline here: dispatch pushes to them and the
/// relayed badge still reaches their socket.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    connections: DashMap<Uuid, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection for `user_id`, returning the connection count.
    pub fn connect(&self, user_id: Uuid) -> usize {
        let mut count = self.connections.entry(user_id).or_insert(0);
        *count += 1;
        debug!("User {} now has {} live connection(s)", user_id, *count);
        *count
    }

    /// Drop one connection; the user goes offline only when the last one closes.
    pub fn disconnect(&self, user_id: Uuid) -> usize {
        let remaining = match self.connections.get_mut(&user_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return 0,
        };

        if remaining == 0 {
            self.connections.remove_if(&user_id, |_, count| *count == 0);
        }
        remaining
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Split `user_ids` into (online, offline), preserving order.
    pub fn partition(&self, user_ids: &[Uuid]) -> (Vec<Uuid>, Vec<Uuid>) {
        user_ids.iter().partition(|user_id| self.is_online(**user_id))
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}
