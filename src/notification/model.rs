use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::StoreError;

/// Placeholder substituted with the acting user's display name.
pub const ACTION_USER_PLACEHOLDER: &str = "{action_user}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Follow,
    MentionInQuestion,
    MentionInAnswer,
    MentionInCodeComment,
    MentionInLessonComment,
    MentionInFeedComment,
    MentionInChannelMessage,
    ChannelMessage,
    ChannelInvite,
    QaAnswer,
    CodeComment,
    FeedComment,
    FeedPin,
    LessonComment,
}

/// Kinds of content a notification can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Post,
    Question,
    Code,
    Feed,
    Lesson,
    CourseCode,
    Channel,
    Message,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Post => "post_id",
            ReferenceKind::Question => "question_id",
            ReferenceKind::Code => "code_id",
            ReferenceKind::Feed => "feed_id",
            ReferenceKind::Lesson => "lesson_id",
            ReferenceKind::CourseCode => "course_code",
            ReferenceKind::Channel => "channel_id",
            ReferenceKind::Message => "message_id",
        }
    }
}

/// Which references a notification type must and may carry.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceShape {
    /// `None` means the actor itself is the subject (follows).
    pub primary: Option<ReferenceKind>,
    pub secondary: &'static [ReferenceKind],
}

impl ReferenceShape {
    fn allows(&self, kind: ReferenceKind) -> bool {
        self.primary == Some(kind) || self.secondary.contains(&kind)
    }
}

impl NotificationType {
    pub const ALL: [NotificationType; 14] = [
        NotificationType::Follow,
        NotificationType::MentionInQuestion,
        NotificationType::MentionInAnswer,
        NotificationType::MentionInCodeComment,
        NotificationType::MentionInLessonComment,
        NotificationType::MentionInFeedComment,
        NotificationType::MentionInChannelMessage,
        NotificationType::ChannelMessage,
        NotificationType::ChannelInvite,
        NotificationType::QaAnswer,
        NotificationType::CodeComment,
        NotificationType::FeedComment,
        NotificationType::FeedPin,
        NotificationType::LessonComment,
    ];

    pub fn from_str(value: &str) -> Result<Self, NotificationError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| NotificationError::InvalidType(value.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Follow => "follow",
            NotificationType::MentionInQuestion => "mention_in_question",
            NotificationType::MentionInAnswer => "mention_in_answer",
            NotificationType::MentionInCodeComment => "mention_in_code_comment",
            NotificationType::MentionInLessonComment => "mention_in_lesson_comment",
            NotificationType::MentionInFeedComment => "mention_in_feed_comment",
            NotificationType::MentionInChannelMessage => "mention_in_channel_message",
            NotificationType::ChannelMessage => "channel_message",
            NotificationType::ChannelInvite => "channel_invite",
            NotificationType::QaAnswer => "qa_answer",
            NotificationType::CodeComment => "code_comment",
            NotificationType::FeedComment => "feed_comment",
            NotificationType::FeedPin => "feed_pin",
            NotificationType::LessonComment => "lesson_comment",
        }
    }

    /// Key of the user preference toggle that governs this type.
    pub fn preference_key(&self) -> &'static str {
        match self {
            NotificationType::Follow => "follows",
            NotificationType::MentionInQuestion
            | NotificationType::MentionInAnswer
            | NotificationType::MentionInCodeComment
            | NotificationType::MentionInLessonComment
            | NotificationType::MentionInFeedComment
            | NotificationType::MentionInChannelMessage => "mentions",
            NotificationType::ChannelMessage => "channel_messages",
            NotificationType::ChannelInvite => "channel_invites",
            NotificationType::QaAnswer => "answers",
            NotificationType::CodeComment
            | NotificationType::FeedComment
            | NotificationType::LessonComment => "comments",
            NotificationType::FeedPin => "pins",
        }
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            NotificationType::Follow => "{action_user} started following you",
            NotificationType::MentionInQuestion => "{action_user} mentioned you in a question",
            NotificationType::MentionInAnswer => "{action_user} mentioned you in an answer",
            NotificationType::MentionInCodeComment => {
                "{action_user} mentioned you in a code comment"
            }
            NotificationType::MentionInLessonComment => {
                "{action_user} mentioned you in a lesson comment"
            }
            NotificationType::MentionInFeedComment => {
                "{action_user} mentioned you in a comment on a post"
            }
            NotificationType::MentionInChannelMessage => {
                "{action_user} mentioned you in a channel"
            }
            NotificationType::ChannelMessage => "{action_user} sent a message",
            NotificationType::ChannelInvite => "{action_user} invited you to a channel",
            NotificationType::QaAnswer => "{action_user} answered your question",
            NotificationType::CodeComment => "{action_user} commented on your code",
            NotificationType::FeedComment => "{action_user} commented on your post",
            NotificationType::FeedPin => "{action_user} pinned your post",
            NotificationType::LessonComment => "{action_user} replied to your lesson comment",
        }
    }

    pub fn reference_shape(&self) -> ReferenceShape {
        use ReferenceKind::*;
        let (primary, secondary): (Option<ReferenceKind>, &'static [ReferenceKind]) = match self {
            NotificationType::Follow => (None, &[]),
            NotificationType::MentionInQuestion => (Some(Question), &[]),
            NotificationType::MentionInAnswer => (Some(Post), &[Question]),
            NotificationType::MentionInCodeComment => (Some(Code), &[Post]),
            NotificationType::MentionInLessonComment => (Some(Lesson), &[Post, CourseCode]),
            NotificationType::MentionInFeedComment => (Some(Feed), &[Post]),
            NotificationType::MentionInChannelMessage => (Some(Channel), &[Message]),
            NotificationType::ChannelMessage => (Some(Channel), &[Message]),
            NotificationType::ChannelInvite => (Some(Channel), &[]),
            NotificationType::QaAnswer => (Some(Question), &[Post]),
            NotificationType::CodeComment => (Some(Code), &[Post]),
            NotificationType::FeedComment => (Some(Feed), &[Post]),
            NotificationType::FeedPin => (Some(Feed), &[]),
            NotificationType::LessonComment => (Some(Lesson), &[Post, CourseCode]),
        };
        ReferenceShape { primary, secondary }
    }
}

/// Optional content references attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationReferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

impl NotificationReferences {
    pub fn is_set(&self, kind: ReferenceKind) -> bool {
        match kind {
            ReferenceKind::Post => self.post_id.is_some(),
            ReferenceKind::Question => self.question_id.is_some(),
            ReferenceKind::Code => self.code_id.is_some(),
            ReferenceKind::Feed => self.feed_id.is_some(),
            ReferenceKind::Lesson => self.lesson_id.is_some(),
            ReferenceKind::CourseCode => self.course_code.is_some(),
            ReferenceKind::Channel => self.channel_id.is_some(),
            ReferenceKind::Message => self.message_id.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        ALL_REFERENCE_KINDS.iter().all(|kind| !self.is_set(*kind))
    }

    /// Checks that the primary reference of `notification_type` is present and
    /// nothing outside its shape is.
    pub fn validate_for(&self, notification_type: NotificationType) -> Result<(), NotificationError> {
        let shape = notification_type.reference_shape();

        if let Some(primary) = shape.primary {
            if !self.is_set(primary) {
                return Err(NotificationError::InvalidReferences(format!(
                    "{} requires {}",
                    notification_type.as_str(),
                    primary.as_str()
                )));
            }
        }

        if let Some(extra) = ALL_REFERENCE_KINDS
            .iter()
            .find(|kind| self.is_set(**kind) && !shape.allows(**kind))
        {
            return Err(NotificationError::InvalidReferences(format!(
                "{} does not accept {}",
                notification_type.as_str(),
                extra.as_str()
            )));
        }

        Ok(())
    }

    /// True when every reference set on `self` has the same value on `other`.
    pub fn is_subset_of(&self, other: &NotificationReferences) -> bool {
        fn matches<T: PartialEq>(wanted: &Option<T>, actual: &Option<T>) -> bool {
            wanted.is_none() || wanted == actual
        }

        matches(&self.post_id, &other.post_id)
            && matches(&self.question_id, &other.question_id)
            && matches(&self.code_id, &other.code_id)
            && matches(&self.feed_id, &other.feed_id)
            && matches(&self.lesson_id, &other.lesson_id)
            && matches(&self.course_code, &other.course_code)
            && matches(&self.channel_id, &other.channel_id)
            && matches(&self.message_id, &other.message_id)
    }
}

const ALL_REFERENCE_KINDS: [ReferenceKind; 8] = [
    ReferenceKind::Post,
    ReferenceKind::Question,
    ReferenceKind::Code,
    ReferenceKind::Feed,
    ReferenceKind::Lesson,
    ReferenceKind::CourseCode,
    ReferenceKind::Channel,
    ReferenceKind::Message,
];

/// A stored notification, one per recipient.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Unexpanded template; clients render `{action_user}` from `actor_id`.
    pub message: String,
    #[schema(value_type = UuidWrapper)]
    pub recipient_id: Uuid,
    #[schema(value_type = UuidWrapper)]
    pub actor_id: Uuid,
    pub is_seen: bool,
    pub is_clicked: bool,
    pub is_hidden: bool,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub references: NotificationReferences,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub notification_type: NotificationType,
    pub message: String,
    pub references: NotificationReferences,
}

/// Selects notifications for cascading deletes. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub recipient_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub notification_type: Option<NotificationType>,
    pub references: NotificationReferences,
}

impl NotificationFilter {
    pub fn is_empty(&self) -> bool {
        self.recipient_id.is_none()
            && self.actor_id.is_none()
            && self.notification_type.is_none()
            && self.references.is_empty()
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.recipient_id.map_or(true, |id| id == notification.recipient_id)
            && self.actor_id.map_or(true, |id| id == notification.actor_id)
            && self
                .notification_type
                .map_or(true, |t| t == notification.notification_type)
            && self.references.is_subset_of(&notification.references)
    }
}

/// Payload of the lightweight badge signal sent on every stored notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeSignal {
    pub id: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub unclicked: i64,
}

// Request / response DTOs

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    /// Pass as `cursor` to fetch the next page; absent on the last page
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnclickedCountResponse {
    pub count: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MarkClickedRequest {
    /// Omit to mark every notification clicked
    pub ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdatedResponse {
    pub updated: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Invalid notification type: {0}")]
    InvalidType(String),

    #[error("Invalid references: {0}")]
    InvalidReferences(String),

    #[error("Refusing to delete with an empty filter")]
    EmptyFilter,
}
