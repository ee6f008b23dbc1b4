use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::StoreError;
use crate::push::model::{KeyVersion, KeystoreEntry, VapidKeys};

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Key generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key {0} disappeared after a concurrent insert")]
    Vanished(&'static str),
}

/// Persistence for key pairs. The version label is unique: inserting a
/// second row with the same label must fail with `StoreError::Duplicate`.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    async fn find_key(&self, version: KeyVersion) -> Result<Option<KeystoreEntry>, StoreError>;

    async fn insert_key(&self, entry: &KeystoreEntry) -> Result<(), StoreError>;

    /// Atomically drop `old`, relabel `active` -> `old` and `candidate` ->
    /// `active`, shifting subscription labels the same way. Subscriptions
    /// bound to the dropped key are deleted. Returns false when there is no
    /// candidate.
    async fn rotate_keys(&self) -> Result<bool, StoreError>;
}

/// Lazily generated, versioned VAPID key pairs.
#[derive(Clone)]
pub struct PushKeyStore {
    repo: Arc<dyn KeyRepository>,
}

impl PushKeyStore {
    pub fn new(repo: Arc<dyn KeyRepository>) -> Self {
        Self { repo }
    }

    /// Return the active key pair, generating it on first use.
    pub async fn ensure_active_keys(&self) -> Result<VapidKeys, KeyStoreError> {
        self.ensure(KeyVersion::Active).await
    }

    pub async fn public_key(&self) -> Result<String, KeyStoreError> {
        Ok(self.ensure_active_keys().await?.public_key)
    }

    /// Keys a subscription bound to `version` must be signed with. Only the
    /// active pair is generated on demand.
    pub async fn keys_for_version(
        &self,
        version: KeyVersion,
    ) -> Result<Option<VapidKeys>, KeyStoreError> {
        match version {
            KeyVersion::Active => self.ensure_active_keys().await.map(Some),
            other => Ok(self.repo.find_key(other).await?.map(VapidKeys::from)),
        }
    }

    /// Generate the next key pair so clients can start subscribing with it.
    pub async fn stage_candidate(&self) -> Result<VapidKeys, KeyStoreError> {
        self.ensure(KeyVersion::Candidate).await
    }

    /// Promote `candidate` -> `active` -> `old`.
    pub async fn rotate(&self) -> Result<bool, KeyStoreError> {
        let rotated = self.repo.rotate_keys().await?;
        if rotated {
            info!("Rotated push key pairs");
        } else {
            warn!("Push key rotation requested without a candidate key");
        }
        Ok(rotated)
    }

    async fn ensure(&self, version: KeyVersion) -> Result<VapidKeys, KeyStoreError> {
        if let Some(entry) = self.repo.find_key(version).await? {
            return Ok(entry.into());
        }

        let entry = generate_entry(version)?;
        match self.repo.insert_key(&entry).await {
            Ok(()) => {
                info!("Generated {} push key pair", version.as_str());
                Ok(entry.into())
            }
            Err(StoreError::Duplicate(_)) => {
                // Another caller won the race; use its row
                self.repo
                    .find_key(version)
                    .await?
                    .map(VapidKeys::from)
                    .ok_or(KeyStoreError::Vanished(version.as_str()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn generate_entry(version: KeyVersion) -> Result<KeystoreEntry, KeyStoreError> {
    let signing_key = SigningKey::random(&mut OsRng);
    let public_key = signing_key.verifying_key().to_encoded_point(false);
    if public_key.len() != 65 {
        return Err(KeyStoreError::GenerationFailed(format!(
            "unexpected public key length {}",
            public_key.len()
        )));
    }

    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    Ok(KeystoreEntry {
        version,
        public_key: engine.encode(public_key.as_bytes()),
        private_key: engine.encode(signing_key.to_bytes()),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::push::model::NewSubscription;
    use crate::push::subscription::SubscriptionRepository;
    use uuid::Uuid;

    fn keystore() -> (Arc<MemoryStore>, PushKeyStore) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), PushKeyStore::new(store))
    }

    #[tokio::test]
    async fn test_first_call_generates_active_pair() {
        let (store, keys) = keystore();

        let first = keys.ensure_active_keys().await.unwrap();
        let second = keys.ensure_active_keys().await.unwrap();

        assert_eq!(first.version, KeyVersion::Active);
        assert_eq!(first.public_key, second.public_key);
        assert_eq!(store.key_count(), 1);

        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        assert_eq!(engine.decode(&first.public_key).unwrap().len(), 65);
        assert_eq!(engine.decode(&first.private_key).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_yields_one_active_row() {
        let (store, keys) = keystore();

        let calls = (0..8).map(|_| keys.ensure_active_keys());
        let results = futures::future::join_all(calls).await;

        let public_keys: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().public_key)
            .collect();
        assert!(public_keys.iter().all(|k| k == &public_keys[0]));
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn test_old_keys_are_never_generated_on_demand() {
        let (_store, keys) = keystore();
        assert!(keys
            .keys_for_version(KeyVersion::Old)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rotation_promotes_candidate_and_shifts_subscriptions() {
        let (store, keys) = keystore();
        let user = Uuid::new_v4();

        assert!(!keys.rotate().await.unwrap());

        let first = keys.ensure_active_keys().await.unwrap();
        let candidate = keys.stage_candidate().await.unwrap();
        let sub = |endpoint: &str, key_version| NewSubscription {
            user_id: user,
            endpoint: endpoint.to_string(),
            p256dh: "p".into(),
            auth: "a".into(),
            key_version,
        };
        store
            .upsert_subscription(sub("https://push.example/a", KeyVersion::Active))
            .await
            .unwrap();
        store
            .upsert_subscription(sub("https://push.example/b", KeyVersion::Candidate))
            .await
            .unwrap();

        assert!(keys.rotate().await.unwrap());

        let active = keys.ensure_active_keys().await.unwrap();
        let old = keys.keys_for_version(KeyVersion::Old).await.unwrap().unwrap();
        assert_eq!(active.public_key, candidate.public_key);
        assert_eq!(old.public_key, first.public_key);

        let subs = store.find_by_users(&[user]).await.unwrap();
        let version_of = |endpoint: &str| {
            subs.iter()
                .find(|s| s.endpoint == endpoint)
                .map(|s| s.key_version)
        };
        assert_eq!(version_of("https://push.example/a"), Some(KeyVersion::Old));
        assert_eq!(version_of("https://push.example/b"), Some(KeyVersion::Active));

        // A second rotation discards the old key and its subscriptions
        keys.stage_candidate().await.unwrap();
        assert!(keys.rotate().await.unwrap());
        let subs = store.find_by_users(&[user]).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].key_version, KeyVersion::Old);
    }
}
