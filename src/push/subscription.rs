use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::db::StoreError;
use crate::push::model::{KeyVersion, NewSubscription, Subscription};

const P256DH_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid subscription key: {0}")]
    InvalidKey(String),
}

/// Persistence for push subscriptions; `endpoint` is unique.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert, or rebind the existing row with the same endpoint.
    async fn upsert_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError>;

    async fn delete_by_endpoint(&self, endpoint: &str) -> Result<bool, StoreError>;

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError>;

    async fn find_by_users(&self, user_ids: &[Uuid]) -> Result<Vec<Subscription>, StoreError>;
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    repo: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionRegistry {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    pub async fn upsert(
        &self,
        user_id: Uuid,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        key_version: KeyVersion,
    ) -> Result<Subscription, SubscriptionError> {
        validate_endpoint(endpoint)?;
        validate_key("p256dh", p256dh, P256DH_LEN)?;
        validate_key("auth", auth, AUTH_SECRET_LEN)?;

        let subscription = self
            .repo
            .upsert_subscription(NewSubscription {
                user_id,
                endpoint: endpoint.trim().to_string(),
                p256dh: p256dh.trim().to_string(),
                auth: auth.trim().to_string(),
                key_version,
            })
            .await?;

        info!(
            "Push subscription {} bound to user {} ({})",
            subscription.id,
            user_id,
            key_version.as_str()
        );
        Ok(subscription)
    }

    pub async fn remove(&self, endpoint: &str) -> Result<bool, SubscriptionError> {
        Ok(self.repo.delete_by_endpoint(endpoint.trim()).await?)
    }

    pub async fn find_by_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<Subscription>, SubscriptionError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.repo.find_by_users(user_ids).await?)
    }

    /// Delete a subscription the push service reported as gone.
    pub async fn prune_dead(&self, subscription_id: i64) -> Result<bool, SubscriptionError> {
        Ok(self.repo.delete_by_id(subscription_id).await?)
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), SubscriptionError> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| SubscriptionError::InvalidEndpoint(e.to_string()))?;

    let loopback = match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };

    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        scheme => Err(SubscriptionError::InvalidEndpoint(format!(
            "unsupported scheme {}",
            scheme
        ))),
    }
}

fn validate_key(name: &str, value: &str, expected_len: usize) -> Result<(), SubscriptionError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| SubscriptionError::InvalidKey(format!("{}: {}", name, e)))?;

    if decoded.len() != expected_len {
        return Err(SubscriptionError::InvalidKey(format!(
            "{} must decode to {} bytes",
            name, expected_len
        )));
    }
    Ok(())
}
