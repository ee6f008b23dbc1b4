use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::db::StoreError;
use crate::mention::model::{
    Attachment, AttachmentOwner, AttachmentRepository, ContentKind, ContentResolver, MentionTarget,
};
use crate::notification::model::{
    NewNotification, Notification, NotificationFilter, NotificationReferences, NotificationType,
};
use crate::notification::store::NotificationRepository;
use crate::push::keystore::KeyRepository;
use crate::push::model::{KeyVersion, KeystoreEntry, NewSubscription, Subscription};
use crate::push::subscription::SubscriptionRepository;
use crate::users::{NotificationPreferences, UserDirectory, UserProfile};

const NOTIFICATION_COLUMNS: &str = "id, notification_type, message, recipient_id, actor_id, \
     is_seen, is_clicked, is_hidden, post_id, question_id, code_id, feed_id, lesson_id, \
     course_code, channel_id, message_id, created_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, endpoint, p256dh, auth, key_version, created_at, updated_at";

/// Every repository trait backed by the `global` Postgres schema.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let raw_type: String = row.try_get("notification_type")?;
    let notification_type = NotificationType::from_str(&raw_type)
        .map_err(|_| StoreError::MalformedRow(format!("notification type {}", raw_type)))?;

    Ok(Notification {
        id: row.try_get("id")?,
        notification_type,
        message: row.try_get("message")?,
        recipient_id: row.try_get("recipient_id")?,
        actor_id: row.try_get("actor_id")?,
        is_seen: row.try_get("is_seen")?,
        is_clicked: row.try_get("is_clicked")?,
        is_hidden: row.try_get("is_hidden")?,
        created_at: row.try_get("created_at")?,
        references: NotificationReferences {
            post_id: row.try_get("post_id")?,
            question_id: row.try_get("question_id")?,
            code_id: row.try_get("code_id")?,
            feed_id: row.try_get("feed_id")?,
            lesson_id: row.try_get("lesson_id")?,
            course_code: row.try_get("course_code")?,
            channel_id: row.try_get("channel_id")?,
            message_id: row.try_get("message_id")?,
        },
    })
}

fn key_version_from_row(row: &PgRow, column: &str) -> Result<KeyVersion, StoreError> {
    let raw: String = row.try_get(column)?;
    KeyVersion::from_str(&raw).map_err(StoreError::MalformedRow)
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, StoreError> {
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        endpoint: row.try_get("endpoint")?,
        p256dh: row.try_get("p256dh")?,
        auth: row.try_get("auth")?,
        key_version: key_version_from_row(row, "key_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn owner_parts(owner: AttachmentOwner) -> (&'static str, i64) {
    match owner {
        AttachmentOwner::Post(id) => ("post", id),
        AttachmentOwner::ChannelMessage(id) => ("channel_message", id),
    }
}

fn attachment_from_row(row: &PgRow, owner: AttachmentOwner) -> Result<Attachment, StoreError> {
    let target_kind: String = row.try_get("target_kind")?;
    let target = match target_kind.as_str() {
        "user" => {
            let user_id: Option<Uuid> = row.try_get("target_user_id")?;
            MentionTarget::User(user_id.ok_or_else(|| {
                StoreError::MalformedRow("user attachment without user id".to_string())
            })?)
        }
        other => {
            let kind = ContentKind::from_str(other).map_err(StoreError::MalformedRow)?;
            let id: Option<i64> = row.try_get("target_content_id")?;
            MentionTarget::Content {
                kind,
                id: id.ok_or_else(|| {
                    StoreError::MalformedRow("content attachment without content id".to_string())
                })?,
            }
        }
    };

    Ok(Attachment {
        id: row.try_get("id")?,
        owner,
        target,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, display_name, is_active, notification_preferences FROM global.users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let preferences: Json<NotificationPreferences> =
                    row.try_get("notification_preferences")?;
                Ok(Some(UserProfile {
                    id: row.try_get("id")?,
                    display_name: row.try_get("display_name")?,
                    is_active: row.try_get("is_active")?,
                    preferences: preferences.0,
                }))
            }
            None => Ok(None),
        }
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE global.users SET is_active = $2 WHERE id = $1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert_notification(
        &self,
        new: NewNotification,
        hidden: bool,
    ) -> Result<Notification, StoreError> {
        let refs = &new.references;
        let sql = format!(
            "INSERT INTO global.notifications \
             (notification_type, message, recipient_id, actor_id, post_id, question_id, code_id, \
              feed_id, lesson_id, course_code, channel_id, message_id, is_hidden) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {}",
            NOTIFICATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new.notification_type.as_str())
            .bind(&new.message)
            .bind(new.recipient_id)
            .bind(new.actor_id)
            .bind(refs.post_id)
            .bind(refs.question_id)
            .bind(refs.code_id)
            .bind(refs.feed_id)
            .bind(refs.lesson_id)
            .bind(&refs.course_code)
            .bind(refs.channel_id)
            .bind(refs.message_id)
            .bind(hidden)
            .fetch_one(&self.pool)
            .await?;

        notification_from_row(&row)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = match cursor {
            Some(cursor_id) => {
                // Joining on the anchor row yields nothing for an unknown cursor
                let sql = format!(
                    "SELECT {} FROM global.notifications n \
                     JOIN (SELECT created_at AS anchor_at, id AS anchor_id \
                           FROM global.notifications WHERE id = $2 AND recipient_id = $1) a \
                       ON (n.created_at, n.id) < (a.anchor_at, a.anchor_id) \
                     WHERE n.recipient_id = $1 AND n.is_hidden = FALSE \
                     ORDER BY n.created_at DESC, n.id DESC \
                     LIMIT $3",
                    prefixed_columns("n")
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(cursor_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM global.notifications \
                     WHERE recipient_id = $1 AND is_hidden = FALSE \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2",
                    NOTIFICATION_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(notification_from_row).collect()
    }

    async fn count_unclicked(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM global.notifications \
             WHERE recipient_id = $1 AND is_hidden = FALSE AND is_clicked = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_clicked(&self, user_id: Uuid, ids: Option<&[i64]>) -> Result<u64, StoreError> {
        let result = match ids {
            Some(ids) => {
                sqlx::query(
                    "UPDATE global.notifications SET is_clicked = TRUE \
                     WHERE recipient_id = $1 AND is_hidden = FALSE AND is_clicked = FALSE \
                       AND id = ANY($2)",
                )
                .bind(user_id)
                .bind(ids)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE global.notifications SET is_clicked = TRUE \
                     WHERE recipient_id = $1 AND is_hidden = FALSE AND is_clicked = FALSE",
                )
                .bind(user_id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn mark_seen(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE global.notifications SET is_seen = TRUE \
             WHERE recipient_id = $1 AND is_hidden = FALSE AND is_seen = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_hidden_for_actor(&self, actor_id: Uuid, hidden: bool) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE global.notifications SET is_hidden = $2 \
             WHERE actor_id = $1 AND is_hidden <> $2",
        )
        .bind(actor_id)
        .bind(hidden)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_matching(&self, filter: &NotificationFilter) -> Result<u64, StoreError> {
        let refs = &filter.references;
        // An unset filter field matches every row
        let result = sqlx::query(
            "DELETE FROM global.notifications \
             WHERE ($1::uuid IS NULL OR recipient_id = $1) \
               AND ($2::uuid IS NULL OR actor_id = $2) \
               AND ($3::text IS NULL OR notification_type = $3) \
               AND ($4::bigint IS NULL OR post_id = $4) \
               AND ($5::bigint IS NULL OR question_id = $5) \
               AND ($6::bigint IS NULL OR code_id = $6) \
               AND ($7::bigint IS NULL OR feed_id = $7) \
               AND ($8::bigint IS NULL OR lesson_id = $8) \
               AND ($9::text IS NULL OR course_code = $9) \
               AND ($10::bigint IS NULL OR channel_id = $10) \
               AND ($11::bigint IS NULL OR message_id = $11)",
        )
        .bind(filter.recipient_id)
        .bind(filter.actor_id)
        .bind(filter.notification_type.map(|t| t.as_str()))
        .bind(refs.post_id)
        .bind(refs.question_id)
        .bind(refs.code_id)
        .bind(refs.feed_id)
        .bind(refs.lesson_id)
        .bind(&refs.course_code)
        .bind(refs.channel_id)
        .bind(refs.message_id)
        .execute(&self.pool)
        .await?;

        debug!("Deleted {} notification(s) by filter", result.rows_affected());
        Ok(result.rows_affected())
    }
}

fn prefixed_columns(alias: &str) -> String {
    NOTIFICATION_COLUMNS
        .split(',')
        .map(|column| format!("{}.{}", alias, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl KeyRepository for PgStore {
    async fn find_key(&self, version: KeyVersion) -> Result<Option<KeystoreEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT version, public_key, private_key, created_at \
             FROM global.push_keystore WHERE version = $1",
        )
        .bind(version.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(KeystoreEntry {
                version: key_version_from_row(&row, "version")?,
                public_key: row.try_get("public_key")?,
                private_key: row.try_get("private_key")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn insert_key(&self, entry: &KeystoreEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO global.push_keystore (version, public_key, private_key, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.version.as_str())
        .bind(&entry.public_key)
        .bind(&entry.private_key)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate_keys(&self) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let versions: Vec<String> =
            sqlx::query_scalar("SELECT version FROM global.push_keystore FOR UPDATE")
                .fetch_all(&mut *tx)
                .await?;
        if !versions.iter().any(|v| v == KeyVersion::Candidate.as_str()) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM global.push_subscriptions WHERE key_version = 'old'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM global.push_keystore WHERE version = 'old'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE global.push_keystore SET version = 'old' WHERE version = 'active'")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE global.push_keystore SET version = 'active' WHERE version = 'candidate'",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE global.push_subscriptions \
             SET key_version = CASE key_version WHEN 'active' THEN 'old' ELSE 'active' END, \
                 updated_at = NOW() \
             WHERE key_version IN ('active', 'candidate')",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl SubscriptionRepository for PgStore {
    async fn upsert_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        let sql = format!(
            "INSERT INTO global.push_subscriptions (user_id, endpoint, p256dh, auth, key_version) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (endpoint) DO UPDATE SET \
               user_id = EXCLUDED.user_id, \
               p256dh = EXCLUDED.p256dh, \
               auth = EXCLUDED.auth, \
               key_version = EXCLUDED.key_version, \
               updated_at = NOW() \
             RETURNING {}",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new.user_id)
            .bind(&new.endpoint)
            .bind(&new.p256dh)
            .bind(&new.auth)
            .bind(new.key_version.as_str())
            .fetch_one(&self.pool)
            .await?;

        subscription_from_row(&row)
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM global.push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id(&self, subscription_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM global.push_subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_users(&self, user_ids: &[Uuid]) -> Result<Vec<Subscription>, StoreError> {
        let sql = format!(
            "SELECT {} FROM global.push_subscriptions WHERE user_id = ANY($1) ORDER BY id",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_ids)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(subscription_from_row).collect()
    }
}

#[async_trait]
impl AttachmentRepository for PgStore {
    async fn list_attachments(&self, owner: AttachmentOwner) -> Result<Vec<Attachment>, StoreError> {
        let (owner_kind, owner_id) = owner_parts(owner);
        let rows = sqlx::query(
            "SELECT id, target_kind, target_user_id, target_content_id, created_at \
             FROM global.mention_attachments \
             WHERE owner_kind = $1 AND owner_id = $2 ORDER BY id",
        )
        .bind(owner_kind)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| attachment_from_row(row, owner))
            .collect()
    }

    async fn insert_attachment(
        &self,
        owner: AttachmentOwner,
        target: &MentionTarget,
    ) -> Result<Attachment, StoreError> {
        let (owner_kind, owner_id) = owner_parts(owner);
        let (target_kind, user_id, content_id) = match target {
            MentionTarget::User(user_id) => ("user", Some(*user_id), None),
            MentionTarget::Content { kind, id } => (kind.as_str(), None, Some(*id)),
        };

        let row = sqlx::query(
            "INSERT INTO global.mention_attachments \
             (owner_kind, owner_id, target_kind, target_user_id, target_content_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, target_kind, target_user_id, target_content_id, created_at",
        )
        .bind(owner_kind)
        .bind(owner_id)
        .bind(target_kind)
        .bind(user_id)
        .bind(content_id)
        .fetch_one(&self.pool)
        .await?;

        attachment_from_row(&row, owner)
    }

    async fn delete_attachments(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM global.mention_attachments WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContentResolver for PgStore {
    async fn content_exists(&self, kind: ContentKind, id: i64) -> Result<bool, StoreError> {
        let table = match kind {
            ContentKind::Code => "codes",
            ContentKind::Question => "questions",
            ContentKind::Feed => "feed_posts",
        };
        let sql = format!("SELECT EXISTS(SELECT 1 FROM global.{} WHERE id = $1)", table);
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}
