use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::middleware::AuthUser;
use crate::push::keystore::{KeyStoreError, PushKeyStore};
use crate::push::model::{
    KeyVersion, PublicKeyResponse, PushErrorResponse, RotateResponse, SubscribeRequest,
    UnsubscribeRequest,
};
use crate::push::subscription::{SubscriptionError, SubscriptionRegistry};

type ErrorReply = (StatusCode, Json<PushErrorResponse>);

fn error_reply(status: StatusCode, error: impl Into<String>, code: &str) -> ErrorReply {
    (
        status,
        Json(PushErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn keystore_error_to_response(err: KeyStoreError) -> ErrorReply {
    error!("Push keystore error: {}", err);
    match err {
        KeyStoreError::StoreError(_) => {
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Database error", "DB_ERROR")
        }
        KeyStoreError::GenerationFailed(_) | KeyStoreError::Vanished(_) => error_reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "Push keys are unavailable",
            "KEYS_UNAVAILABLE",
        ),
    }
}

fn subscription_error_to_response(err: SubscriptionError) -> ErrorReply {
    match err {
        SubscriptionError::StoreError(e) => {
            error!("Subscription store error: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Database error", "DB_ERROR")
        }
        SubscriptionError::InvalidEndpoint(msg) => {
            error_reply(StatusCode::BAD_REQUEST, msg, "INVALID_ENDPOINT")
        }
        SubscriptionError::InvalidKey(msg) => {
            error_reply(StatusCode::BAD_REQUEST, msg, "INVALID_KEY")
        }
    }
}

/// Public key browsers subscribe with
#[utoipa::path(
    get,
    path = "/api/push/public-key",
    tag = "push",
    responses(
        (status = 200, description = "Active VAPID public key", body = PublicKeyResponse),
        (status = 503, description = "Keys unavailable", body = PushErrorResponse)
    )
)]
pub async fn get_public_key(Extension(keys): Extension<Arc<PushKeyStore>>) -> impl IntoResponse {
    match keys.public_key().await {
        Ok(public_key) => (
            StatusCode::OK,
            Json(PublicKeyResponse {
                public_key,
                key_version: KeyVersion::Active,
            }),
        )
            .into_response(),
        Err(e) => keystore_error_to_response(e).into_response(),
    }
}

/// Register (or re-bind) a push endpoint for the caller
#[utoipa::path(
    post,
    path = "/api/push/subscriptions",
    tag = "push",
    request_body = SubscribeRequest,
    responses(
        (status = 201, description = "Subscription stored", body = crate::push::model::Subscription),
        (status = 400, description = "Invalid subscription", body = PushErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = PushErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn subscribe(
    Extension(user): Extension<AuthUser>,
    Extension(keys): Extension<Arc<PushKeyStore>>,
    Extension(registry): Extension<Arc<SubscriptionRegistry>>,
    Json(request): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let key_version = request.key_version.unwrap_or(KeyVersion::Active);
    match key_version {
        KeyVersion::Old => {
            return error_reply(
                StatusCode::BAD_REQUEST,
                "Cannot subscribe with a retired key",
                "INVALID_KEY_VERSION",
            )
            .into_response();
        }
        KeyVersion::Candidate => match keys.keys_for_version(KeyVersion::Candidate).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return error_reply(
                    StatusCode::BAD_REQUEST,
                    "No candidate key is staged",
                    "INVALID_KEY_VERSION",
                )
                .into_response();
            }
            Err(e) => return keystore_error_to_response(e).into_response(),
        },
        KeyVersion::Active => {}
    }

    match registry
        .upsert(
            user.user_id,
            &request.endpoint,
            &request.keys.p256dh,
            &request.keys.auth,
            key_version,
        )
        .await
    {
        Ok(subscription) => (StatusCode::CREATED, Json(subscription)).into_response(),
        Err(e) => subscription_error_to_response(e).into_response(),
    }
}

/// Forget a push endpoint
#[utoipa::path(
    delete,
    path = "/api/push/subscriptions",
    tag = "push",
    request_body = UnsubscribeRequest,
    responses(
        (status = 204, description = "Subscription removed"),
        (status = 404, description = "Unknown endpoint", body = PushErrorResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unsubscribe(
    Extension(user): Extension<AuthUser>,
    Extension(registry): Extension<Arc<SubscriptionRegistry>>,
    Json(request): Json<UnsubscribeRequest>,
) -> impl IntoResponse {
    match registry.remove(&request.endpoint).await {
        Ok(true) => {
            info!("User {} removed a push subscription", user.user_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_reply(
            StatusCode::NOT_FOUND,
            "Subscription not found",
            "NOT_FOUND",
        )
        .into_response(),
        Err(e) => subscription_error_to_response(e).into_response(),
    }
}

/// Generate the candidate key pair ahead of a rotation
#[utoipa::path(
    post,
    path = "/api/admin/push/keys/candidate",
    tag = "push",
    responses(
        (status = 200, description = "Candidate public key", body = PublicKeyResponse),
        (status = 403, description = "Admin role required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn stage_candidate(Extension(keys): Extension<Arc<PushKeyStore>>) -> impl IntoResponse {
    match keys.stage_candidate().await {
        Ok(pair) => (
            StatusCode::OK,
            Json(PublicKeyResponse {
                public_key: pair.public_key,
                key_version: pair.version,
            }),
        )
            .into_response(),
        Err(e) => keystore_error_to_response(e).into_response(),
    }
}

/// Promote the candidate key pair
#[utoipa::path(
    post,
    path = "/api/admin/push/keys/rotate",
    tag = "push",
    responses(
        (status = 200, description = "Rotation result", body = RotateResponse),
        (status = 403, description = "Admin role required")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn rotate_keys(Extension(keys): Extension<Arc<PushKeyStore>>) -> impl IntoResponse {
    match keys.rotate().await {
        Ok(rotated) => (StatusCode::OK, Json(RotateResponse { rotated })).into_response(),
        Err(e) => keystore_error_to_response(e).into_response(),
    }
}
