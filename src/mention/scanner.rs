use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mention::model::{
    Attachment, AttachmentRepository, ContentKind, ContentResolver, MentionError, MentionOwner,
    MentionTarget, ReconcileReport,
};
use crate::notification::dispatcher::{
    DispatchEvent, DispatchOptions, NotificationDispatcher,
};
use crate::notification::model::NotificationFilter;
use crate::notification::store::NotificationStore;
use crate::users::UserDirectory;

/// `[user id="{uuid}"]Display Name[/user]`
static USER_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[user\s+id="?([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})"?\](?s:.*?)\[/user\]"#)
        .expect("Invalid user mention regex")
});

/// Internal links, absolute or site-relative.
static CONTENT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://[^\s/]+)?/(Compiler-Playground|Discuss|Feed)/(\d+)\b")
        .expect("Invalid content link regex")
});

const MENTION_TITLE: &str = "New mention";

/// Extract every mention and content link from `body`, first occurrence
/// order, without duplicates.
pub fn scan(body: &str) -> Vec<MentionTarget> {
    let mut found: Vec<(usize, MentionTarget)> = Vec::new();

    for cap in USER_MARKUP.captures_iter(body) {
        if let (Some(whole), Some(id)) = (cap.get(0), cap.get(1)) {
            if let Ok(user_id) = Uuid::parse_str(id.as_str()) {
                found.push((whole.start(), MentionTarget::User(user_id)));
            }
        }
    }

    for cap in CONTENT_LINK.captures_iter(body) {
        let (Some(whole), Some(segment), Some(id)) = (cap.get(0), cap.get(1), cap.get(2)) else {
            continue;
        };
        let (Some(kind), Ok(id)) = (
            ContentKind::from_path_segment(segment.as_str()),
            id.as_str().parse::<i64>(),
        ) else {
            continue;
        };
        found.push((whole.start(), MentionTarget::Content { kind, id }));
    }

    found.sort_by_key(|(offset, _)| *offset);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, target)| target)
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Keeps mention attachments of a message in sync with its body and
/// notifies newly mentioned users.
#[derive(Clone)]
pub struct MentionScanner {
    attachments: Arc<dyn AttachmentRepository>,
    content: Arc<dyn ContentResolver>,
    users: Arc<dyn UserDirectory>,
    notifications: NotificationStore,
    dispatcher: NotificationDispatcher,
}

impl MentionScanner {
    pub fn new(
        attachments: Arc<dyn AttachmentRepository>,
        content: Arc<dyn ContentResolver>,
        users: Arc<dyn UserDirectory>,
        notifications: NotificationStore,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            attachments,
            content,
            users,
            notifications,
            dispatcher,
        }
    }

    /// Called after every save of `owner`. Never fails: the caller's save
    /// has already happened, so problems are only logged.
    pub async fn reconcile_mentions(
        &self,
        body: &str,
        owner: &MentionOwner,
        author_id: Uuid,
    ) -> ReconcileReport {
        match self.try_reconcile(body, owner, author_id).await {
            Ok(report) => {
                debug!("Reconciled mentions for {:?}: {:?}", owner.key(), report);
                report
            }
            Err(e) => {
                error!("Mention reconciliation failed for {:?}: {}", owner.key(), e);
                ReconcileReport::default()
            }
        }
    }

    async fn try_reconcile(
        &self,
        body: &str,
        owner: &MentionOwner,
        author_id: Uuid,
    ) -> Result<ReconcileReport, MentionError> {
        let mut report = ReconcileReport::default();
        let key = owner.key();
        let existing = self.attachments.list_attachments(key).await?;

        let mut wanted = Vec::new();
        for target in scan(body) {
            if self.resolves(&target).await {
                wanted.push(target);
            } else {
                report.dropped += 1;
            }
        }

        let mut newly_mentioned = Vec::new();
        for target in &wanted {
            if existing.iter().any(|a| &a.target == target) {
                report.kept += 1;
                continue;
            }
            self.attachments.insert_attachment(key, target).await?;
            report.created += 1;
            if let MentionTarget::User(user_id) = target {
                if *user_id != author_id {
                    newly_mentioned.push(*user_id);
                }
            }
        }

        let stale: Vec<&Attachment> = existing
            .iter()
            .filter(|a| !wanted.contains(&a.target))
            .collect();
        if !stale.is_empty() {
            let ids: Vec<i64> = stale.iter().map(|a| a.id).collect();
            report.removed = self.attachments.delete_attachments(&ids).await? as usize;
            for attachment in stale {
                if let MentionTarget::User(user_id) = attachment.target {
                    self.retract(owner, user_id, author_id).await;
                }
            }
        }

        if !newly_mentioned.is_empty() {
            let event = DispatchEvent::new(
                owner.mention_type(),
                MENTION_TITLE,
                author_id,
                owner.references(),
            )
            .with_url(owner.url());
            let dispatched = self
                .dispatcher
                .dispatch(&newly_mentioned, &event, DispatchOptions::default())
                .await;
            report.notified = dispatched.allowed;
        }

        Ok(report)
    }

    /// Dangling targets and lookup failures both resolve to false.
    async fn resolves(&self, target: &MentionTarget) -> bool {
        let result = match target {
            MentionTarget::User(user_id) => self
                .users
                .find_user(*user_id)
                .await
                .map(|user| user.is_some()),
            MentionTarget::Content { kind, id } => self.content.content_exists(*kind, *id).await,
        };
        match result {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to resolve mention target {:?}: {}", target, e);
                false
            }
        }
    }

    async fn retract(&self, owner: &MentionOwner, user_id: Uuid, author_id: Uuid) {
        let filter = NotificationFilter {
            recipient_id: Some(user_id),
            actor_id: Some(author_id),
            notification_type: Some(owner.mention_type()),
            references: owner.references(),
            ..Default::default()
        };
        match self.notifications.delete_by_reference(&filter).await {
            Ok(removed) => info!(
                "Retracted {} mention notification(s) for user {}",
                removed, user_id
            ),
            Err(e) => warn!("Failed to retract mention for user {}: {}", user_id, e),
        }
    }
}
