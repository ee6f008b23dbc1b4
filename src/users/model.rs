use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::StoreError;
use crate::notification::model::NotificationType;

fn enabled() -> bool {
    true
}

/// The fixed set of per-user notification toggles. Missing keys mean enabled;
/// keys outside the set are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default = "enabled")]
    pub follows: bool,
    #[serde(default = "enabled")]
    pub mentions: bool,
    #[serde(default = "enabled")]
    pub channel_messages: bool,
    #[serde(default = "enabled")]
    pub channel_invites: bool,
    #[serde(default = "enabled")]
    pub answers: bool,
    #[serde(default = "enabled")]
    pub comments: bool,
    #[serde(default = "enabled")]
    pub pins: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            follows: true,
            mentions: true,
            channel_messages: true,
            channel_invites: true,
            answers: true,
            comments: true,
            pins: true,
        }
    }
}

impl NotificationPreferences {
    fn toggle_mut(&mut self, key: &str) -> Option<&mut bool> {
        match key {
            "follows" => Some(&mut self.follows),
            "mentions" => Some(&mut self.mentions),
            "channel_messages" => Some(&mut self.channel_messages),
            "channel_invites" => Some(&mut self.channel_invites),
            "answers" => Some(&mut self.answers),
            "comments" => Some(&mut self.comments),
            "pins" => Some(&mut self.pins),
            _ => None,
        }
    }

    fn toggle(&self, key: &str) -> Option<bool> {
        match key {
            "follows" => Some(self.follows),
            "mentions" => Some(self.mentions),
            "channel_messages" => Some(self.channel_messages),
            "channel_invites" => Some(self.channel_invites),
            "answers" => Some(self.answers),
            "comments" => Some(self.comments),
            "pins" => Some(self.pins),
            _ => None,
        }
    }

    pub fn is_enabled(&self, notification_type: NotificationType) -> bool {
        self.toggle(notification_type.preference_key()).unwrap_or(true)
    }

    /// Returns false for a key outside the toggle set.
    pub fn set(&mut self, key: &str, enabled: bool) -> bool {
        match self.toggle_mut(key) {
            Some(toggle) => {
                *toggle = enabled;
                true
            }
            None => false,
        }
    }
}

/// What the notification core needs to know about a user.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub is_active: bool,
    pub preferences: NotificationPreferences,
}

/// Read access to user accounts, owned by the account CRUD layer.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    /// Returns false when no such user exists.
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError>;
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetActiveRequest {
    #[schema(example = "false")]
    pub active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SetActiveResponse {
    #[schema(value_type = UuidWrapper)]
    pub user_id: Uuid,
    pub active: bool,
    /// Notifications newly hidden because this user acted on them
    pub hidden_notifications: u64,
}
