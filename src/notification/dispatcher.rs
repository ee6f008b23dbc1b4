use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::live::{LiveChannel, PresenceTracker};
use crate::notification::model::{
    NewNotification, NotificationReferences, NotificationType, ACTION_USER_PLACEHOLDER,
};
use crate::notification::preference::PreferenceGate;
use crate::notification::store::NotificationStore;
use crate::push::keystore::PushKeyStore;
use crate::push::model::{KeyVersion, PushPayload, Subscription, VapidKeys};
use crate::push::subscription::SubscriptionRegistry;
use crate::push::transport::{PushError, PushTransport};
use crate::users::UserDirectory;

const UNKNOWN_ACTOR: &str = "Someone";

/// A feature-level event to fan out.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub notification_type: NotificationType,
    pub title: String,
    /// Template; may contain `{action_user}`.
    pub message: String,
    pub acting_user_id: Uuid,
    pub url: Option<String>,
    pub references: NotificationReferences,
}

impl DispatchEvent {
    /// Event using the type's default template.
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        acting_user_id: Uuid,
        references: NotificationReferences,
    ) -> Self {
        Self {
            notification_type,
            title: title.into(),
            message: notification_type.default_template().to_string(),
            acting_user_id,
            url: None,
            references,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Deliver push only; no stored record and no badge signal.
    pub push_only: bool,
}

/// What happened during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub allowed: usize,
    pub online: usize,
    pub offline: usize,
    pub pushed: usize,
    pub pruned: usize,
    pub push_failed: usize,
    pub stored: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub push_timeout: Duration,
    pub push_concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(5),
            push_concurrency: 16,
        }
    }
}

#[derive(Default)]
struct PushTally {
    pushed: AtomicUsize,
    pruned: AtomicUsize,
    failed: AtomicUsize,
}

/// Fans a single event out to stored records, live badges and Web Push.
#[derive(Clone)]
pub struct NotificationDispatcher {
    preferences: PreferenceGate,
    users: Arc<dyn UserDirectory>,
    presence: Arc<PresenceTracker>,
    live: Arc<LiveChannel>,
    subscriptions: SubscriptionRegistry,
    keys: PushKeyStore,
    transport: Arc<dyn PushTransport>,
    notifications: NotificationStore,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preferences: PreferenceGate,
        users: Arc<dyn UserDirectory>,
        presence: Arc<PresenceTracker>,
        live: Arc<LiveChannel>,
        subscriptions: SubscriptionRegistry,
        keys: PushKeyStore,
        transport: Arc<dyn PushTransport>,
        notifications: NotificationStore,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            preferences,
            users,
            presence,
            live,
            subscriptions,
            keys,
            transport,
            notifications,
            settings,
        }
    }

    /// Deliver `event` to `recipients`. Never fails: every per-recipient and
    /// per-endpoint failure is logged and counted.
    pub async fn dispatch(
        &self,
        recipients: &[Uuid],
        event: &DispatchEvent,
        options: DispatchOptions,
    ) -> DispatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = recipients
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let allowed = self
            .preferences
            .filter_allowed(&unique, event.notification_type)
            .await;
        let mut report = DispatchReport {
            allowed: allowed.len(),
            ..Default::default()
        };
        if allowed.is_empty() {
            debug!(
                "No recipient accepts {} notifications",
                event.notification_type.as_str()
            );
            return report;
        }

        let actor_name = self.actor_name(event.acting_user_id).await;
        let payload = PushPayload {
            title: event.title.clone(),
            body: event.message.replace(ACTION_USER_PLACEHOLDER, &actor_name),
            url: event.url.clone(),
        };

        let (online, offline) = self.presence.partition(&allowed);
        report.online = online.len();
        report.offline = offline.len();

        if !offline.is_empty() {
            let tally = self.push_to_offline(&offline, &payload).await;
            report.pushed = tally.pushed.into_inner();
            report.pruned = tally.pruned.into_inner();
            report.push_failed = tally.failed.into_inner();
        }

        if !options.push_only {
            report.stored = self.store_records(&allowed, event).await;
        }

        info!(
            notification_type = event.notification_type.as_str(),
            allowed = report.allowed,
            online = report.online,
            pushed = report.pushed,
            stored = report.stored,
            "Dispatched notification"
        );
        report
    }

    /// Emit a rich payload to the recipients that currently have a live
    /// connection. Returns how many of them were online.
    pub async fn emit_live_to_online<T: Serialize>(
        &self,
        recipients: &[Uuid],
        event: &str,
        payload: &T,
    ) -> usize {
        let (online, _) = self.presence.partition(recipients);
        if !online.is_empty() {
            self.live.emit_to_users(&online, event, payload).await;
        }
        online.len()
    }

    async fn actor_name(&self, actor_id: Uuid) -> String {
        match self.users.find_user(actor_id).await {
            Ok(Some(user)) => user.display_name,
            Ok(None) => UNKNOWN_ACTOR.to_string(),
            Err(e) => {
                warn!("Failed to load acting user {}: {}", actor_id, e);
                UNKNOWN_ACTOR.to_string()
            }
        }
    }

    async fn push_to_offline(&self, offline: &[Uuid], payload: &PushPayload) -> PushTally {
        let tally = PushTally::default();

        let subscriptions = match self.subscriptions.find_by_users(offline).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("Failed to load push subscriptions: {}", e);
                return tally;
            }
        };
        if subscriptions.is_empty() {
            return tally;
        }

        let keys = self.resolve_keys(&subscriptions).await;
        let jobs: Vec<(Subscription, VapidKeys)> = subscriptions
            .into_iter()
            .filter_map(|subscription| {
                let pair = keys.get(&subscription.key_version)?.clone();
                Some((subscription, pair))
            })
            .collect();

        let tally_ref = &tally;
        let limit = self.settings.push_concurrency.max(1);
        stream::iter(jobs)
            .for_each_concurrent(limit, |(subscription, pair)| async move {
                self.deliver(&subscription, &pair, payload, tally_ref).await;
            })
            .await;

        tally
    }

    /// Load the key pair for every version the subscriptions are bound to.
    /// A version without keys is skipped with a log line.
    async fn resolve_keys(&self, subscriptions: &[Subscription]) -> HashMap<KeyVersion, VapidKeys> {
        let versions: HashSet<KeyVersion> = subscriptions.iter().map(|s| s.key_version).collect();
        let mut keys = HashMap::new();
        for version in versions {
            match self.keys.keys_for_version(version).await {
                Ok(Some(pair)) => {
                    keys.insert(version, pair);
                }
                Ok(None) => warn!(
                    "No {} push key pair; skipping its subscriptions",
                    version.as_str()
                ),
                Err(e) => error!(
                    "Failed to obtain {} push keys, skipping push: {}",
                    version.as_str(),
                    e
                ),
            }
        }
        keys
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        keys: &VapidKeys,
        payload: &PushPayload,
        tally: &PushTally,
    ) {
        let result = match tokio::time::timeout(
            self.settings.push_timeout,
            self.transport.send(subscription, keys, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout),
        };

        match result {
            Ok(()) => {
                tally.pushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_gone() => {
                info!(
                    subscription_id = subscription.id,
                    user_id = %subscription.user_id,
                    "Pruning dead push endpoint: {}",
                    e
                );
                match self.subscriptions.prune_dead(subscription.id).await {
                    Ok(_) => {
                        tally.pruned.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(prune_err) => warn!(
                        "Failed to prune push subscription {}: {}",
                        subscription.id, prune_err
                    ),
                }
            }
            Err(e) => {
                warn!(
                    subscription_id = subscription.id,
                    user_id = %subscription.user_id,
                    "Push delivery failed: {}",
                    e
                );
                tally.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn store_records(&self, allowed: &[Uuid], event: &DispatchEvent) -> usize {
        let creates = allowed.iter().map(|recipient_id| {
            self.notifications.create(NewNotification {
                recipient_id: *recipient_id,
                actor_id: event.acting_user_id,
                notification_type: event.notification_type,
                message: event.message.clone(),
                references: event.references.clone(),
            })
        });

        futures::future::join_all(creates)
            .await
            .into_iter()
            .zip(allowed)
            .filter(|(result, recipient_id)| match result {
                Ok(created) => created.is_some(),
                Err(e) => {
                    error!(
                        "Failed to store notification for user {}: {}",
                        recipient_id, e
                    );
                    false
                }
            })
            .count()
    }
}
