use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::push::model::{PushPayload, Subscription, VapidKeys};
use crate::push::transport::{PushError, PushTransport};

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const MAX_PAYLOAD_BYTES: usize = 3500;
const VAPID_JWT_EXP_SECS: i64 = 12 * 60 * 60;
const VAPID_JWT_SKEW_SECS: i64 = 60;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const KEY_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Debug, Clone)]
struct CachedJwt {
    token: String,
    exp_unix: i64,
}

/// Web Push client: RFC 8291 payload encryption, RFC 8292 VAPID auth.
#[derive(Debug)]
pub struct WebPushClient {
    client: reqwest::Client,
    subject: String,
    ttl_secs: u64,
    /// (audience, public key) -> signed token
    jwt_cache: DashMap<(String, String), CachedJwt>,
}

impl WebPushClient {
    pub fn new(subject: String, timeout: Duration, ttl_secs: u64) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            subject,
            ttl_secs,
            jwt_cache: DashMap::new(),
        })
    }

    fn vapid_token(&self, audience: &str, keys: &VapidKeys) -> Result<String, PushError> {
        let now = Utc::now().timestamp();
        let cache_key = (audience.to_string(), keys.public_key.clone());
        if let Some(cached) = self.jwt_cache.get(&cache_key) {
            if cached.exp_unix - VAPID_JWT_SKEW_SECS > now {
                return Ok(cached.token.clone());
            }
        }

        let exp_unix = now + VAPID_JWT_EXP_SECS;
        let token = build_vapid_jwt(audience, &self.subject, &keys.private_key, exp_unix)?;
        self.jwt_cache.insert(
            cache_key,
            CachedJwt {
                token: token.clone(),
                exp_unix,
            },
        );
        Ok(token)
    }
}

#[async_trait]
impl PushTransport for WebPushClient {
    async fn send(
        &self,
        subscription: &Subscription,
        keys: &VapidKeys,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let audience = push_service_audience(&subscription.endpoint)?;
        let jwt = self.vapid_token(&audience, keys)?;

        let plaintext = encode_payload(payload)?;
        let client_public = decode_fixed::<PUBLIC_KEY_LEN>("p256dh", &subscription.p256dh)?;
        let client_auth = decode_fixed::<AUTH_SECRET_LEN>("auth", &subscription.auth)?;
        let body = encrypt_aes128gcm(&plaintext, &client_public, &client_auth)?;

        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_secs.to_string())
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header("Authorization", format!("vapid t={}, k={}", jwt, keys.public_key))
            .header("Urgency", "normal")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout
                } else {
                    PushError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Push delivered to subscription {}", subscription.id);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        Err(PushError::from_status(status.as_u16(), truncate(&body, 500)))
    }
}

/// Serialize the payload, shortening the body when it would not fit a record.
fn encode_payload(payload: &PushPayload) -> Result<Vec<u8>, PushError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| PushError::Encryption(e.to_string()))?;
    if bytes.len() <= MAX_PAYLOAD_BYTES {
        return Ok(bytes);
    }

    let shortened = PushPayload {
        title: truncate(&payload.title, 80),
        body: truncate(&payload.body, 600),
        url: payload.url.clone(),
    };
    serde_json::to_vec(&shortened).map_err(|e| PushError::Encryption(e.to_string()))
}

/// Origin of the push service, used as the VAPID `aud` claim.
fn push_service_audience(endpoint: &str) -> Result<String, PushError> {
    let url = Url::parse(endpoint)
        .map_err(|e| PushError::RequestFailed(format!("Invalid push endpoint URL: {}", e)))?;
    match url.origin() {
        origin @ url::Origin::Tuple(..) => Ok(origin.ascii_serialization()),
        url::Origin::Opaque(_) => Err(PushError::RequestFailed(
            "Push endpoint has no origin".to_string(),
        )),
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    let mut chars = input.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

fn b64url() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

fn decode_fixed<const N: usize>(name: &str, value: &str) -> Result<[u8; N], PushError> {
    b64url()
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| PushError::Encryption(format!("Invalid {}: {}", name, e)))?
        .try_into()
        .map_err(|_| PushError::Encryption(format!("Invalid {} length", name)))
}

fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), PushError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, out)
        .map_err(|_| PushError::Encryption("HKDF expand failed".to_string()))
}

/// Single-record aes128gcm body: salt | rs | idlen | keyid | ciphertext.
fn encrypt_aes128gcm(
    plaintext: &[u8],
    client_public_raw: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> Result<Vec<u8>, PushError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let client_public = p256::PublicKey::from_sec1_bytes(client_public_raw)
        .map_err(|_| PushError::Encryption("Invalid p256dh point".to_string()))?;

    let local_secret = EphemeralSecret::random(&mut OsRng);
    let local_public = p256::PublicKey::from(&local_secret).to_encoded_point(false);
    let local_public = local_public.as_bytes();
    let shared = local_secret.diffie_hellman(&client_public);

    let mut ikm_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    ikm_info.extend_from_slice(IKM_INFO_PREFIX);
    ikm_info.extend_from_slice(client_public_raw);
    ikm_info.extend_from_slice(local_public);

    let mut ikm = [0u8; 32];
    hkdf_sha256(auth_secret, shared.raw_secret_bytes().as_slice(), &ikm_info, &mut ikm)?;
    let mut cek = [0u8; 16];
    hkdf_sha256(&salt, &ikm, KEY_INFO, &mut cek)?;
    let mut nonce = [0u8; 12];
    hkdf_sha256(&salt, &ikm, NONCE_INFO, &mut nonce)?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| PushError::Encryption("Invalid content key length".to_string()))?;

    // 0x02 marks the last (and only) record
    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(2);

    let ciphertext = cipher
        .encrypt((&nonce).into(), padded.as_slice())
        .map_err(|_| PushError::Encryption("AES-GCM encryption failed".to_string()))?;

    let mut body = Vec::with_capacity(SALT_LEN + 5 + PUBLIC_KEY_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(local_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, PushError> {
    serde_json::to_vec(value)
        .map(|json| b64url().encode(json))
        .map_err(|e| PushError::Encryption(format!("JWT serialization failed: {}", e)))
}

fn build_vapid_jwt(
    audience: &str,
    subject: &str,
    private_key_b64: &str,
    exp_unix: i64,
) -> Result<String, PushError> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: i64,
        sub: &'a str,
    }

    let header = encode_segment(&serde_json::json!({ "typ": "JWT", "alg": "ES256" }))?;
    let claims = encode_segment(&Claims {
        aud: audience,
        exp: exp_unix,
        sub: subject,
    })?;
    let signing_input = format!("{}.{}", header, claims);

    let private_raw = decode_fixed::<32>("VAPID private key", private_key_b64)?;
    let signing_key = SigningKey::from_bytes((&private_raw).into())
        .map_err(|_| PushError::Encryption("Invalid VAPID private key".to_string()))?;
    let signature: Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        b64url().encode(signature.to_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    fn keys() -> VapidKeys {
        let signing_key = SigningKey::random(&mut OsRng);
        VapidKeys {
            version: crate::push::model::KeyVersion::Active,
            public_key: b64url().encode(
                signing_key
                    .verifying_key()
                    .to_encoded_point(false)
                    .as_bytes(),
            ),
            private_key: b64url().encode(signing_key.to_bytes()),
        }
    }

    #[test]
    fn test_audience_is_endpoint_origin() {
        assert_eq!(
            push_service_audience("https://fcm.googleapis.com/fcm/send/abc").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            push_service_audience("https://push.example:8443/x/y").unwrap(),
            "https://push.example:8443"
        );
        assert!(push_service_audience("not a url").is_err());
    }

    #[test]
    fn test_vapid_jwt_verifies_with_public_key() {
        let keys = keys();
        let token = build_vapid_jwt(
            "https://push.example",
            "mailto:ops@example.com",
            &keys.private_key,
            1_900_000_000,
        )
        .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&b64url().decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example");
        assert_eq!(claims["sub"], "mailto:ops@example.com");

        let public_raw = b64url().decode(&keys.public_key).unwrap();
        let verifying_key = VerifyingKey::from_sec1_bytes(&public_raw).unwrap();
        let signature = Signature::from_slice(&b64url().decode(parts[2]).unwrap()).unwrap();
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        assert!(verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .is_ok());
    }

    #[test]
    fn test_encrypted_body_layout() {
        let client_secret = p256::SecretKey::random(&mut OsRng);
        let client_public: [u8; PUBLIC_KEY_LEN] = client_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();
        let auth = [7u8; AUTH_SECRET_LEN];
        let plaintext = br#"{"title":"t","body":"b"}"#;

        let body = encrypt_aes128gcm(plaintext, &client_public, &auth).unwrap();

        assert_eq!(&body[SALT_LEN..SALT_LEN + 4], &RECORD_SIZE.to_be_bytes());
        assert_eq!(body[SALT_LEN + 4] as usize, PUBLIC_KEY_LEN);
        // header + plaintext + delimiter + 16 byte tag
        assert_eq!(
            body.len(),
            SALT_LEN + 5 + PUBLIC_KEY_LEN + plaintext.len() + 1 + 16
        );
    }

    #[test]
    fn test_oversized_payload_is_shortened() {
        let payload = PushPayload {
            title: "t".repeat(200),
            body: "b".repeat(5000),
            url: Some("/notifications".into()),
        };
        let bytes = encode_payload(&payload).unwrap();
        assert!(bytes.len() <= MAX_PAYLOAD_BYTES);

        let decoded: PushPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.url.as_deref(), Some("/notifications"));
        assert!(decoded.body.ends_with('…'));
    }
}
