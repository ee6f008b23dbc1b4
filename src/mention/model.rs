use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::StoreError;
use crate::notification::model::{NotificationReferences, NotificationType};

/// Content kinds reachable through internal links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    Question,
    Feed,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Code => "code",
            ContentKind::Question => "question",
            ContentKind::Feed => "feed",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, String> {
        match value {
            "code" => Ok(ContentKind::Code),
            "question" => Ok(ContentKind::Question),
            "feed" => Ok(ContentKind::Feed),
            _ => Err(format!("Invalid content kind: {}", value)),
        }
    }

    /// Maps a whitelisted link path segment to its content kind.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "Compiler-Playground" => Some(ContentKind::Code),
            "Discuss" => Some(ContentKind::Question),
            "Feed" => Some(ContentKind::Feed),
            _ => None,
        }
    }
}

/// What a detected reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MentionTarget {
    User(Uuid),
    Content { kind: ContentKind, id: i64 },
}

/// The record an attachment hangs off: a post or a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentOwner {
    Post(i64),
    ChannelMessage(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: i64,
    pub owner: AttachmentOwner,
    pub target: MentionTarget,
    pub created_at: DateTime<Utc>,
}

/// A message body that can carry mentions, with the context needed to build
/// the mention notification.
#[derive(Debug, Clone, PartialEq)]
pub enum MentionOwner {
    Question {
        post_id: i64,
    },
    Answer {
        post_id: i64,
        question_id: i64,
    },
    CodeComment {
        post_id: i64,
        code_id: i64,
    },
    LessonComment {
        post_id: i64,
        lesson_id: i64,
        course_code: Option<String>,
    },
    FeedComment {
        post_id: i64,
        feed_id: i64,
    },
    ChannelMessage {
        message_id: i64,
        channel_id: i64,
    },
}

impl MentionOwner {
    pub fn key(&self) -> AttachmentOwner {
        match self {
            MentionOwner::Question { post_id }
            | MentionOwner::Answer { post_id, .. }
            | MentionOwner::CodeComment { post_id, .. }
            | MentionOwner::LessonComment { post_id, .. }
            | MentionOwner::FeedComment { post_id, .. } => AttachmentOwner::Post(*post_id),
            MentionOwner::ChannelMessage { message_id, .. } => {
                AttachmentOwner::ChannelMessage(*message_id)
            }
        }
    }

    pub fn mention_type(&self) -> NotificationType {
        match self {
            MentionOwner::Question { .. } => NotificationType::MentionInQuestion,
            MentionOwner::Answer { .. } => NotificationType::MentionInAnswer,
            MentionOwner::CodeComment { .. } => NotificationType::MentionInCodeComment,
            MentionOwner::LessonComment { .. } => NotificationType::MentionInLessonComment,
            MentionOwner::FeedComment { .. } => NotificationType::MentionInFeedComment,
            MentionOwner::ChannelMessage { .. } => NotificationType::MentionInChannelMessage,
        }
    }

    /// References stored on the mention notification; also the retraction key.
    pub fn references(&self) -> NotificationReferences {
        match self {
            MentionOwner::Question { post_id } => NotificationReferences {
                question_id: Some(*post_id),
                ..Default::default()
            },
            MentionOwner::Answer {
                post_id,
                question_id,
            } => NotificationReferences {
                post_id: Some(*post_id),
                question_id: Some(*question_id),
                ..Default::default()
            },
            MentionOwner::CodeComment { post_id, code_id } => NotificationReferences {
                post_id: Some(*post_id),
                code_id: Some(*code_id),
                ..Default::default()
            },
            MentionOwner::LessonComment {
                post_id,
                lesson_id,
                course_code,
            } => NotificationReferences {
                post_id: Some(*post_id),
                lesson_id: Some(*lesson_id),
                course_code: course_code.clone(),
                ..Default::default()
            },
            MentionOwner::FeedComment { post_id, feed_id } => NotificationReferences {
                post_id: Some(*post_id),
                feed_id: Some(*feed_id),
                ..Default::default()
            },
            MentionOwner::ChannelMessage {
                message_id,
                channel_id,
            } => NotificationReferences {
                channel_id: Some(*channel_id),
                message_id: Some(*message_id),
                ..Default::default()
            },
        }
    }

    /// Client route the push notification opens.
    pub fn url(&self) -> String {
        match self {
            MentionOwner::Question { post_id } => format!("/Discuss/{}", post_id),
            MentionOwner::Answer {
                post_id,
                question_id,
            } => format!("/Discuss/{}?answer={}", question_id, post_id),
            MentionOwner::CodeComment { post_id, code_id } => {
                format!("/Compiler-Playground/{}?comment={}", code_id, post_id)
            }
            MentionOwner::LessonComment {
                post_id,
                lesson_id,
                course_code,
            } => match course_code {
                Some(code) => format!("/Courses/{}/Lesson/{}?comment={}", code, lesson_id, post_id),
                None => format!("/Lesson/{}?comment={}", lesson_id, post_id),
            },
            MentionOwner::FeedComment { post_id, feed_id } => {
                format!("/Feed/{}?comment={}", feed_id, post_id)
            }
            MentionOwner::ChannelMessage { channel_id, .. } => format!("/Channels/{}", channel_id),
        }
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: usize,
    pub created: usize,
    pub removed: usize,
    pub dropped: usize,
    pub notified: usize,
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn list_attachments(&self, owner: AttachmentOwner) -> Result<Vec<Attachment>, StoreError>;

    async fn insert_attachment(
        &self,
        owner: AttachmentOwner,
        target: &MentionTarget,
    ) -> Result<Attachment, StoreError>;

    async fn delete_attachments(&self, ids: &[i64]) -> Result<u64, StoreError>;
}

/// Existence checks against the content tables owned by the CRUD layer.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn content_exists(&self, kind: ContentKind, id: i64) -> Result<bool, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MentionError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}
