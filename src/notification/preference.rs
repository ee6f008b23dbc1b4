use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::db::StoreError;
use crate::notification::model::NotificationType;
use crate::users::UserDirectory;

/// Decides whether a user accepts notifications of a given type.
#[derive(Clone)]
pub struct PreferenceGate {
    users: Arc<dyn UserDirectory>,
}

impl PreferenceGate {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Unknown users never accept anything.
    pub async fn is_allowed(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<bool, StoreError> {
        match self.users.find_user(user_id).await? {
            Some(user) => Ok(user
                .preferences
                .is_enabled(notification_type)),
            None => {
                warn!("Preference lookup for unknown user {}", user_id);
                Ok(false)
            }
        }
    }

    /// Whether `user_id` may surface as an actor. Unknown users count as
    /// active so their records stay visible.
    pub async fn is_active(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .users
            .find_user(user_id)
            .await?
            .map_or(true, |user| user.is_active))
    }

    /// Keeps the recipients that accept `notification_type`, in input order.
    /// Lookup failures drop the recipient.
    pub async fn filter_allowed(
        &self,
        user_ids: &[Uuid],
        notification_type: NotificationType,
    ) -> Vec<Uuid> {
        let checks = user_ids.iter().map(|user_id| async move {
            match self.is_allowed(*user_id, notification_type).await {
                Ok(allowed) => allowed.then_some(*user_id),
                Err(e) => {
                    warn!("Preference check failed for user {}: {}", user_id, e);
                    None
                }
            }
        });

        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
