use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::live::LiveChannel;
use crate::notification::model::{
    BadgeSignal, NewNotification, Notification, NotificationError, NotificationFilter,
};
use crate::notification::preference::PreferenceGate;

pub const BADGE_EVENT: &str = "notification:new";
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Persistence for notification records.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// `hidden` is stored as given; it is true when the actor is inactive.
    async fn insert_notification(
        &self,
        new: NewNotification,
        hidden: bool,
    ) -> Result<Notification, StoreError>;

    /// Visible notifications, newest first, strictly older than `cursor`
    /// when given. An unknown cursor yields an empty page.
    async fn list_notifications(
        &self,
        user_id: Uuid,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn count_unclicked(&self, user_id: Uuid) -> Result<i64, StoreError>;

    /// `None` marks every visible unclicked notification of the user.
    async fn mark_clicked(&self, user_id: Uuid, ids: Option<&[i64]>) -> Result<u64, StoreError>;

    async fn mark_seen(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn set_hidden_for_actor(&self, actor_id: Uuid, hidden: bool) -> Result<u64, StoreError>;

    async fn delete_matching(&self, filter: &NotificationFilter) -> Result<u64, StoreError>;
}

/// Durable notification records plus the badge signal fired on creation.
#[derive(Clone)]
pub struct NotificationStore {
    repo: Arc<dyn NotificationRepository>,
    preferences: PreferenceGate,
    live: Arc<LiveChannel>,
}

impl NotificationStore {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        preferences: PreferenceGate,
        live: Arc<LiveChannel>,
    ) -> Self {
        Self {
            repo,
            preferences,
            live,
        }
    }

    /// Store a notification for one recipient.
    ///
    /// Returns `Ok(None)` when the recipient does not exist or does not accept
    /// this type; callers treat that as a skip. A record acted by an inactive
    /// account is stored hidden and fires no badge signal.
    pub async fn create(
        &self,
        params: NewNotification,
    ) -> Result<Option<Notification>, NotificationError> {
        params.references.validate_for(params.notification_type)?;

        if !self
            .preferences
            .is_allowed(params.recipient_id, params.notification_type)
            .await?
        {
            return Ok(None);
        }

        let hidden = !self.preferences.is_active(params.actor_id).await?;
        let notification = self.repo.insert_notification(params, hidden).await?;
        info!(
            "Created notification {} ({}) for user {}",
            notification.id,
            notification.notification_type.as_str(),
            notification.recipient_id
        );
        if notification.is_hidden {
            return Ok(Some(notification));
        }

        let unclicked = match self.repo.count_unclicked(notification.recipient_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count unclicked notifications: {}", e);
                0
            }
        };
        self.live
            .emit_to_users(
                &[notification.recipient_id],
                BADGE_EVENT,
                &BadgeSignal {
                    id: notification.id,
                    notification_type: notification.notification_type,
                    unclicked,
                },
            )
            .await;

        Ok(Some(notification))
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        cursor: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Notification>, NotificationError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Ok(self.repo.list_notifications(user_id, cursor, limit).await?)
    }

    pub async fn count_unclicked(&self, user_id: Uuid) -> Result<i64, NotificationError> {
        Ok(self.repo.count_unclicked(user_id).await?)
    }

    /// Mark `ids` (only those owned by `user_id`) or, without ids, all of the
    /// user's visible unclicked notifications.
    pub async fn mark_clicked(
        &self,
        user_id: Uuid,
        ids: Option<&[i64]>,
    ) -> Result<u64, NotificationError> {
        if matches!(ids, Some([])) {
            return Ok(0);
        }
        Ok(self.repo.mark_clicked(user_id, ids).await?)
    }

    pub async fn mark_seen(&self, user_id: Uuid) -> Result<u64, NotificationError> {
        Ok(self.repo.mark_seen(user_id).await?)
    }

    /// Called when the actor's account active-state flips.
    pub async fn cascade_hide_for_actor(
        &self,
        actor_id: Uuid,
        hidden: bool,
    ) -> Result<u64, NotificationError> {
        let changed = self.repo.set_hidden_for_actor(actor_id, hidden).await?;
        info!(
            "Set hidden={} on {} notification(s) acted by {}",
            hidden, changed, actor_id
        );
        Ok(changed)
    }

    pub async fn delete_by_reference(
        &self,
        filter: &NotificationFilter,
    ) -> Result<u64, NotificationError> {
        if filter.is_empty() {
            return Err(NotificationError::EmptyFilter);
        }
        Ok(self.repo.delete_matching(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::live::{Connection, LiveEvent};
    use crate::notification::model::{NotificationReferences, NotificationType};
    use crate::users::UserDirectory;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        live: Arc<LiveChannel>,
        notifications: NotificationStore,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(LiveChannel::new(None));
        let notifications = NotificationStore::new(
            store.clone(),
            PreferenceGate::new(store.clone()),
            live.clone(),
        );
        Fixture {
            store,
            live,
            notifications,
        }
    }

    fn follow(recipient_id: Uuid, actor_id: Uuid) -> NewNotification {
        NewNotification {
            recipient_id,
            actor_id,
            notification_type: NotificationType::Follow,
            message: NotificationType::Follow.default_template().to_string(),
            references: NotificationReferences::default(),
        }
    }

    #[tokio::test]
    async fn test_create_emits_badge_signal() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        let (tx, mut rx) = mpsc::channel::<LiveEvent>(4);
        f.live.join_user_group(&Connection::new(tx), recipient);

        let created = f
            .notifications
            .create(follow(recipient, actor))
            .await
            .unwrap()
            .unwrap();

        assert!(!created.is_seen && !created.is_clicked && !created.is_hidden);
        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.event, BADGE_EVENT);
        assert_eq!(signal.data["id"], created.id);
        assert_eq!(signal.data["unclicked"], 1);
    }

    #[tokio::test]
    async fn test_create_skips_disallowed_and_unknown_recipients() {
        let f = fixture();
        let actor = f.store.add_user("bob");
        let muted = f.store.add_user("ada");
        f.store.set_preference(muted, "follows", false);

        assert!(f
            .notifications
            .create(follow(muted, actor))
            .await
            .unwrap()
            .is_none());
        assert!(f
            .notifications
            .create(follow(Uuid::new_v4(), actor))
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.store.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_wrong_reference_shape() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        let mut params = follow(recipient, actor);
        params.notification_type = NotificationType::CodeComment;

        assert!(matches!(
            f.notifications.create(params).await,
            Err(NotificationError::InvalidReferences(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_clicked_by_ids_and_all() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        let other = f.store.add_user("eve");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let n = f.notifications.create(follow(recipient, actor)).await.unwrap().unwrap();
            ids.push(n.id);
        }
        let foreign = f.notifications.create(follow(other, actor)).await.unwrap().unwrap();

        // Ids owned by someone else are ignored
        let changed = f
            .notifications
            .mark_clicked(recipient, Some(&[ids[0], foreign.id]))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(f.notifications.count_unclicked(recipient).await.unwrap(), 2);
        assert_eq!(f.notifications.count_unclicked(other).await.unwrap(), 1);

        assert_eq!(f.notifications.mark_clicked(recipient, None).await.unwrap(), 2);
        assert_eq!(f.notifications.count_unclicked(recipient).await.unwrap(), 0);
        assert_eq!(f.notifications.mark_clicked(recipient, Some(&[])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_seen() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        f.notifications.create(follow(recipient, actor)).await.unwrap();

        assert_eq!(f.notifications.mark_seen(recipient).await.unwrap(), 1);
        let page = f.notifications.list_for_user(recipient, None, None).await.unwrap();
        assert!(page[0].is_seen);
        assert!(!page[0].is_clicked);
    }

    #[tokio::test]
    async fn test_cascade_hide_is_excluded_from_list_and_count() {
        let f = fixture();
        let recipient = f.store.add_user("ada");
        let deactivated = f.store.add_user("bob");
        let other = f.store.add_user("eve");
        f.notifications.create(follow(recipient, deactivated)).await.unwrap();
        f.notifications.create(follow(recipient, other)).await.unwrap();

        let hidden = f
            .notifications
            .cascade_hide_for_actor(deactivated, true)
            .await
            .unwrap();
        assert_eq!(hidden, 1);

        let page = f.notifications.list_for_user(recipient, None, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].actor_id, other);
        assert_eq!(f.notifications.count_unclicked(recipient).await.unwrap(), 1);

        // Marking everything clicked leaves hidden rows alone
        assert_eq!(f.notifications.mark_clicked(recipient, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_from_inactive_actor_is_stored_hidden() {
        let f = fixture();
        let recipient = f.store.add_user("ada");
        let actor = f.store.add_user("bob");
        f.store.set_active(actor, false).await.unwrap();
        let (tx, mut rx) = mpsc::channel::<LiveEvent>(4);
        f.live.join_user_group(&Connection::new(tx), recipient);

        let created = f
            .notifications
            .create(follow(recipient, actor))
            .await
            .unwrap()
            .unwrap();

        assert!(created.is_hidden);
        assert!(rx.try_recv().is_err());
        assert!(f
            .notifications
            .list_for_user(recipient, None, None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(f.notifications.count_unclicked(recipient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyset_pagination_has_no_gaps_or_duplicates() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        let base = Utc::now() - Duration::hours(1);
        for i in 0..7 {
            f.store.insert_notification_at(
                follow(recipient, actor),
                false,
                base + Duration::seconds(i),
            );
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = f
                .notifications
                .list_for_user(recipient, cursor, Some(3))
                .await
                .unwrap();
            if page.is_empty() {
                break;
            }
            // New rows arrive between pages; they are newer than the cursor window
            f.notifications.create(follow(recipient, actor)).await.unwrap();

            cursor = page.last().map(|n| n.id);
            seen.extend(page);
        }

        assert_eq!(seen.len(), 7);
        let ids: HashSet<i64> = seen.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), 7);
        assert!(seen
            .windows(2)
            .all(|pair| pair[0].created_at > pair[1].created_at));
    }

    #[tokio::test]
    async fn test_delete_by_reference() {
        let f = fixture();
        let (recipient, actor) = (f.store.add_user("ada"), f.store.add_user("bob"));
        let comment = |feed_id| NewNotification {
            recipient_id: recipient,
            actor_id: actor,
            notification_type: NotificationType::FeedComment,
            message: NotificationType::FeedComment.default_template().to_string(),
            references: NotificationReferences {
                feed_id: Some(feed_id),
                ..Default::default()
            },
        };
        f.notifications.create(comment(1)).await.unwrap();
        f.notifications.create(comment(1)).await.unwrap();
        f.notifications.create(comment(2)).await.unwrap();

        let filter = NotificationFilter {
            references: NotificationReferences {
                feed_id: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(f.notifications.delete_by_reference(&filter).await.unwrap(), 2);
        assert_eq!(f.store.notification_count(), 1);

        assert!(matches!(
            f.notifications
                .delete_by_reference(&NotificationFilter::default())
                .await,
            Err(NotificationError::EmptyFilter)
        ));
    }
}
