use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::{IntoParams, ToSchema};

use crate::auth::middleware::AuthUser;
use crate::notification::model::{
    MarkClickedRequest, NotificationError, NotificationErrorResponse, NotificationListResponse,
    UnclickedCountResponse, UpdatedResponse,
};
use crate::notification::store::{NotificationStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct NotificationsQueryParams {
    /// Id of the last notification of the previous page
    #[schema(example = "42")]
    cursor: Option<i64>,
    #[schema(example = "20")]
    limit: Option<i64>,
}

fn notification_error_to_response(
    err: NotificationError,
) -> (StatusCode, Json<NotificationErrorResponse>) {
    let (status, error_message, code) = match err {
        NotificationError::StoreError(e) => {
            error!("Store error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "DB_ERROR",
            )
        }
        NotificationError::InvalidType(t) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid notification type: {}", t),
            "INVALID_TYPE",
        ),
        NotificationError::InvalidReferences(msg) => {
            (StatusCode::BAD_REQUEST, msg, "INVALID_REFERENCES")
        }
        NotificationError::EmptyFilter => (
            StatusCode::BAD_REQUEST,
            "Filter must name at least one field".to_string(),
            "EMPTY_FILTER",
        ),
    };

    (
        status,
        Json(NotificationErrorResponse {
            error: error_message,
            code: code.to_string(),
        }),
    )
}

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(NotificationsQueryParams),
    responses(
        (status = 200, description = "One page of notifications", body = NotificationListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_notifications(
    Extension(user): Extension<AuthUser>,
    Extension(store): Extension<Arc<NotificationStore>>,
    Query(params): Query<NotificationsQueryParams>,
) -> impl IntoResponse {
    debug!("Listing notifications for user {}", user.user_id);

    match store
        .list_for_user(user.user_id, params.cursor, params.limit)
        .await
    {
        Ok(notifications) => {
            let page_size = params
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE);
            let next_cursor = match notifications.last() {
                Some(last) if notifications.len() as i64 >= page_size => Some(last.id),
                _ => None,
            };
            (
                StatusCode::OK,
                Json(NotificationListResponse {
                    notifications,
                    next_cursor,
                }),
            )
                .into_response()
        }
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Count the caller's unclicked notifications
#[utoipa::path(
    get,
    path = "/api/notifications/unclicked-count",
    tag = "notifications",
    responses(
        (status = 200, description = "Unclicked count", body = UnclickedCountResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unclicked_count(
    Extension(user): Extension<AuthUser>,
    Extension(store): Extension<Arc<NotificationStore>>,
) -> impl IntoResponse {
    match store.count_unclicked(user.user_id).await {
        Ok(count) => (StatusCode::OK, Json(UnclickedCountResponse { count })).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark notifications clicked
///
/// Given ids are scoped to the caller; without ids every visible unclicked
/// notification is marked.
#[utoipa::path(
    post,
    path = "/api/notifications/clicked",
    tag = "notifications",
    request_body = MarkClickedRequest,
    responses(
        (status = 200, description = "Notifications updated", body = UpdatedResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_clicked(
    Extension(user): Extension<AuthUser>,
    Extension(store): Extension<Arc<NotificationStore>>,
    Json(request): Json<MarkClickedRequest>,
) -> impl IntoResponse {
    match store.mark_clicked(user.user_id, request.ids.as_deref()).await {
        Ok(updated) => (StatusCode::OK, Json(UpdatedResponse { updated })).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark every notification of the caller seen
#[utoipa::path(
    post,
    path = "/api/notifications/seen",
    tag = "notifications",
    responses(
        (status = 200, description = "Notifications updated", body = UpdatedResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_seen(
    Extension(user): Extension<AuthUser>,
    Extension(store): Extension<Arc<NotificationStore>>,
) -> impl IntoResponse {
    match store.mark_seen(user.user_id).await {
        Ok(updated) => (StatusCode::OK, Json(UpdatedResponse { updated })).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::Role;
    use crate::db::memory::MemoryStore;
    use crate::live::LiveChannel;
    use crate::notification::model::{NewNotification, NotificationReferences, NotificationType};
    use crate::notification::preference::PreferenceGate;
    use uuid::Uuid;

    fn auth(user_id: Uuid) -> Extension<AuthUser> {
        Extension(AuthUser {
            user_id,
            role: Role::User,
            device_id: None,
        })
    }

    #[test]
    fn test_error_codes() {
        let (status, Json(body)) = notification_error_to_response(NotificationError::EmptyFilter);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "EMPTY_FILTER");

        let (status, Json(body)) = notification_error_to_response(
            NotificationError::InvalidType("nope".into()),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "INVALID_TYPE");
    }

    #[tokio::test]
    async fn test_handlers_respond_ok() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(NotificationStore::new(
            memory.clone(),
            PreferenceGate::new(memory.clone()),
            Arc::new(LiveChannel::new(None)),
        ));
        let (user, actor) = (memory.add_user("ada"), memory.add_user("bob"));
        store
            .create(NewNotification {
                recipient_id: user,
                actor_id: actor,
                notification_type: NotificationType::Follow,
                message: NotificationType::Follow.default_template().to_string(),
                references: NotificationReferences::default(),
            })
            .await
            .unwrap();

        let response = list_notifications(
            auth(user),
            Extension(store.clone()),
            Query(NotificationsQueryParams::default()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = mark_clicked(
            auth(user),
            Extension(store.clone()),
            Json(MarkClickedRequest::default()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.count_unclicked(user).await.unwrap(), 0);

        let response = mark_seen(auth(user), Extension(store.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
