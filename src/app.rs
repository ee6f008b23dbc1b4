use std::sync::Arc;

use crate::live::{LiveChannel, PresenceTracker};
use crate::mention::model::{AttachmentRepository, ContentResolver};
use crate::mention::MentionScanner;
use crate::notification::dispatcher::{DispatchSettings, NotificationDispatcher};
use crate::notification::store::{NotificationRepository, NotificationStore};
use crate::notification::PreferenceGate;
use crate::push::keystore::KeyRepository;
use crate::push::subscription::SubscriptionRepository;
use crate::push::{PushKeyStore, PushTransport, SubscriptionRegistry};
use crate::users::UserDirectory;

/// A store that backs every repository the notification core needs.
pub trait NotificationBackend:
    UserDirectory
    + NotificationRepository
    + KeyRepository
    + SubscriptionRepository
    + AttachmentRepository
    + ContentResolver
    + 'static
{
}

impl<T> NotificationBackend for T where
    T: UserDirectory
        + NotificationRepository
        + KeyRepository
        + SubscriptionRepository
        + AttachmentRepository
        + ContentResolver
        + 'static
{
}

/// The wired notification core, shared by HTTP handlers and feature code.
#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<dyn UserDirectory>,
    pub notifications: Arc<NotificationStore>,
    pub keys: Arc<PushKeyStore>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub mentions: Arc<MentionScanner>,
}

impl AppServices {
    pub fn new<S: NotificationBackend>(
        store: Arc<S>,
        live: Arc<LiveChannel>,
        presence: Arc<PresenceTracker>,
        transport: Arc<dyn PushTransport>,
        settings: DispatchSettings,
    ) -> Self {
        let users: Arc<dyn UserDirectory> = store.clone();
        let preferences = PreferenceGate::new(users.clone());
        let notifications = NotificationStore::new(store.clone(), preferences.clone(), live.clone());
        let keys = PushKeyStore::new(store.clone());
        let subscriptions = SubscriptionRegistry::new(store.clone());

        let dispatcher = NotificationDispatcher::new(
            preferences,
            users.clone(),
            presence,
            live,
            subscriptions.clone(),
            keys.clone(),
            transport,
            notifications.clone(),
            settings,
        );
        let mentions = MentionScanner::new(
            store.clone(),
            store,
            users.clone(),
            notifications.clone(),
            dispatcher.clone(),
        );

        Self {
            users,
            notifications: Arc::new(notifications),
            keys: Arc::new(keys),
            subscriptions: Arc::new(subscriptions),
            dispatcher: Arc::new(dispatcher),
            mentions: Arc::new(mentions),
        }
    }
}
