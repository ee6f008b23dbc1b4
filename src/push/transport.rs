use async_trait::async_trait;

use crate::push::model::{PushPayload, Subscription, VapidKeys};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// 404/410: the endpoint no longer exists and should be pruned.
    #[error("Push endpoint gone (status {0})")]
    Gone(u16),

    #[error("Push service rejected delivery: status {status} body {body}")]
    Rejected { status: u16, body: String },

    #[error("Push delivery timed out")]
    Timeout,

    #[error("Push request failed: {0}")]
    RequestFailed(String),

    #[error("Push payload encryption failed: {0}")]
    Encryption(String),
}

impl PushError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 | 410 => PushError::Gone(status),
            _ => PushError::Rejected { status, body },
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, PushError::Gone(_))
    }
}

/// Sends one encrypted message to one push endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &Subscription,
        keys: &VapidKeys,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}
