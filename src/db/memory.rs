//! In-memory repositories for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::mention::model::{
    Attachment, AttachmentOwner, AttachmentRepository, ContentKind, ContentResolver, MentionTarget,
};
use crate::notification::model::{NewNotification, Notification, NotificationFilter};
use crate::notification::store::NotificationRepository;
use crate::push::keystore::KeyRepository;
use crate::push::model::{KeyVersion, KeystoreEntry, NewSubscription, Subscription};
use crate::push::subscription::SubscriptionRepository;
use crate::users::{NotificationPreferences, UserDirectory, UserProfile};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserProfile>,
    notifications: Vec<Notification>,
    keys: HashMap<KeyVersion, KeystoreEntry>,
    subscriptions: Vec<Subscription>,
    attachments: Vec<Attachment>,
    content: HashSet<(ContentKind, i64)>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_user(&self, display_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().users.insert(
            id,
            UserProfile {
                id,
                display_name: display_name.to_string(),
                is_active: true,
                preferences: NotificationPreferences::default(),
            },
        );
        id
    }

    pub fn set_preference(&self, user_id: Uuid, key: &str, enabled: bool) {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            assert!(
                user.preferences.set(key, enabled),
                "unknown preference key {}",
                key
            );
        }
    }

    pub fn is_active(&self, user_id: Uuid) -> Option<bool> {
        self.state().users.get(&user_id).map(|u| u.is_active)
    }

    pub fn add_content(&self, kind: ContentKind, id: i64) {
        self.state().content.insert((kind, id));
    }

    pub fn notification_count(&self) -> usize {
        self.state().notifications.len()
    }

    /// Every stored notification of `user_id`, hidden ones included.
    pub fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.state()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insert_notification_at(
        &self,
        new: NewNotification,
        hidden: bool,
        created_at: DateTime<Utc>,
    ) -> Notification {
        let mut state = self.state();
        let notification = Notification {
            id: state.next_id(),
            notification_type: new.notification_type,
            message: new.message,
            recipient_id: new.recipient_id,
            actor_id: new.actor_id,
            is_seen: false,
            is_clicked: false,
            is_hidden: hidden,
            created_at,
            references: new.references,
        };
        state.notifications.push(notification.clone());
        notification
    }

    pub fn key_count(&self) -> usize {
        self.state().keys.len()
    }

    pub fn attachments_of(&self, owner: AttachmentOwner) -> Vec<Attachment> {
        self.state()
            .attachments
            .iter()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect()
    }
}

fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state().users.get(&user_id).cloned())
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError> {
        Ok(match self.state().users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(
        &self,
        new: NewNotification,
        hidden: bool,
    ) -> Result<Notification, StoreError> {
        let mut created_at = Utc::now();
        // Keep creation order strictly increasing, as a database clock would
        if let Some(last) = self.state().notifications.iter().map(|n| n.created_at).max() {
            if created_at <= last {
                created_at = last + chrono::Duration::microseconds(1);
            }
        }
        Ok(self.insert_notification_at(new, hidden, created_at))
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state();
        let anchor = match cursor {
            Some(cursor_id) => {
                match state
                    .notifications
                    .iter()
                    .find(|n| n.id == cursor_id && n.recipient_id == user_id)
                {
                    Some(n) => Some((n.created_at, n.id)),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        let mut page: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id && !n.is_hidden)
            .filter(|n| anchor.map_or(true, |anchor| (n.created_at, n.id) < anchor))
            .cloned()
            .collect();
        page.sort_by(newest_first);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn count_unclicked(&self, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .state()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id && !n.is_hidden && !n.is_clicked)
            .count() as i64)
    }

    async fn mark_clicked(&self, user_id: Uuid, ids: Option<&[i64]>) -> Result<u64, StoreError> {
        let mut changed = 0;
        for n in self.state().notifications.iter_mut() {
            let selected = ids.map_or(true, |ids| ids.contains(&n.id));
            if selected && n.recipient_id == user_id && !n.is_hidden && !n.is_clicked {
                n.is_clicked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_seen(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut changed = 0;
        for n in self.state().notifications.iter_mut() {
            if n.recipient_id == user_id && !n.is_hidden && !n.is_seen {
                n.is_seen = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_hidden_for_actor(&self, actor_id: Uuid, hidden: bool) -> Result<u64, StoreError> {
        let mut changed = 0;
        for n in self.state().notifications.iter_mut() {
            if n.actor_id == actor_id && n.is_hidden != hidden {
                n.is_hidden = hidden;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_matching(&self, filter: &NotificationFilter) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.notifications.len();
        state.notifications.retain(|n| !filter.matches(n));
        Ok((before - state.notifications.len()) as u64)
    }
}

#[async_trait]
impl KeyRepository for MemoryStore {
    async fn find_key(&self, version: KeyVersion) -> Result<Option<KeystoreEntry>, StoreError> {
        // Let concurrent callers interleave like they would on a real pool
        tokio::task::yield_now().await;
        Ok(self.state().keys.get(&version).cloned())
    }

    async fn insert_key(&self, entry: &KeystoreEntry) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.keys.contains_key(&entry.version) {
            return Err(StoreError::Duplicate(format!(
                "push_keystore.version = {}",
                entry.version.as_str()
            )));
        }
        state.keys.insert(entry.version, entry.clone());
        Ok(())
    }

    async fn rotate_keys(&self) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(candidate) = state.keys.remove(&KeyVersion::Candidate) else {
            return Ok(false);
        };

        state.keys.remove(&KeyVersion::Old);
        state
            .subscriptions
            .retain(|s| s.key_version != KeyVersion::Old);
        if let Some(mut active) = state.keys.remove(&KeyVersion::Active) {
            active.version = KeyVersion::Old;
            state.keys.insert(KeyVersion::Old, active);
        }
        state.keys.insert(
            KeyVersion::Active,
            KeystoreEntry {
                version: KeyVersion::Active,
                ..candidate
            },
        );

        let now = Utc::now();
        for s in state.subscriptions.iter_mut() {
            s.key_version = match s.key_version {
                KeyVersion::Active => KeyVersion::Old,
                KeyVersion::Candidate => KeyVersion::Active,
                KeyVersion::Old => KeyVersion::Old,
            };
            s.updated_at = now;
        }
        Ok(true)
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn upsert_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        let mut state = self.state();
        let now = Utc::now();
        if let Some(existing) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.endpoint == new.endpoint)
        {
            existing.user_id = new.user_id;
            existing.p256dh = new.p256dh;
            existing.auth = new.auth;
            existing.key_version = new.key_version;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            id: state.next_id(),
            user_id: new.user_id,
            endpoint: new.endpoint,
            p256dh: new.p256dh,
            auth: new.auth,
            key_version: new.key_version,
            created_at: now,
            updated_at: now,
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.endpoint != endpoint);
        Ok(state.subscriptions.len() < before)
    }

    async fn delete_by_id(&self, subscription_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != subscription_id);
        Ok(state.subscriptions.len() < before)
    }

    async fn find_by_users(&self, user_ids: &[Uuid]) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .filter(|s| user_ids.contains(&s.user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttachmentRepository for MemoryStore {
    async fn list_attachments(&self, owner: AttachmentOwner) -> Result<Vec<Attachment>, StoreError> {
        Ok(self.attachments_of(owner))
    }

    async fn insert_attachment(
        &self,
        owner: AttachmentOwner,
        target: &MentionTarget,
    ) -> Result<Attachment, StoreError> {
        let mut state = self.state();
        let attachment = Attachment {
            id: state.next_id(),
            owner,
            target: target.clone(),
            created_at: Utc::now(),
        };
        state.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachments(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.attachments.len();
        state.attachments.retain(|a| !ids.contains(&a.id));
        Ok((before - state.attachments.len()) as u64)
    }
}

#[async_trait]
impl ContentResolver for MemoryStore {
    async fn content_exists(&self, kind: ContentKind, id: i64) -> Result<bool, StoreError> {
        Ok(self.state().content.contains(&(kind, id)))
    }
}
