use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Generation label of a VAPID key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyVersion {
    Old,
    Active,
    Candidate,
}

impl KeyVersion {
    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "old" => Ok(KeyVersion::Old),
            "active" => Ok(KeyVersion::Active),
            "candidate" => Ok(KeyVersion::Candidate),
            _ => Err(format!("Invalid key version: {}", value)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyVersion::Old => "old",
            KeyVersion::Active => "active",
            KeyVersion::Candidate => "candidate",
        }
    }
}

/// One stored generation of the push signing key pair.
#[derive(Clone)]
pub struct KeystoreEntry {
    pub version: KeyVersion,
    /// base64url uncompressed P-256 point (65 bytes)
    pub public_key: String,
    /// base64url raw scalar (32 bytes)
    pub private_key: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for KeystoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreEntry")
            .field("version", &self.version)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Key pair handed to the push transport for signing.
#[derive(Clone)]
pub struct VapidKeys {
    pub version: KeyVersion,
    pub public_key: String,
    pub private_key: String,
}

impl From<KeystoreEntry> for VapidKeys {
    fn from(entry: KeystoreEntry) -> Self {
        Self {
            version: entry.version,
            public_key: entry.public_key,
            private_key: entry.private_key,
        }
    }
}

impl fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeys")
            .field("version", &self.version)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// A browser push endpoint registered by one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub id: i64,
    #[schema(value_type = UuidWrapper)]
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub key_version: KeyVersion,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = DateTimeWrapper)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub key_version: KeyVersion,
}

/// JSON body delivered to the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// Request / response DTOs

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Mirrors the browser's `PushSubscription.toJSON()` plus the key version
/// the client subscribed with.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    #[schema(example = "https://fcm.googleapis.com/fcm/send/abc123")]
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    pub key_version: Option<KeyVersion>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicKeyResponse {
    pub public_key: String,
    pub key_version: KeyVersion,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RotateResponse {
    pub rotated: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PushErrorResponse {
    pub error: String,
    pub code: String,
}
