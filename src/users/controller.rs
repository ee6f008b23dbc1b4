use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::notification::model::NotificationErrorResponse;
use crate::notification::store::NotificationStore;
use crate::users::model::{SetActiveRequest, SetActiveResponse};
use crate::users::UserDirectory;

fn error_reply(
    status: StatusCode,
    error: &str,
    code: &str,
) -> (StatusCode, Json<NotificationErrorResponse>) {
    (
        status,
        Json(NotificationErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Activate or deactivate an account
///
/// Deactivation hides every notification the user acted on. Reactivation
/// does not un-hide them.
#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/active",
    tag = "admin",
    params(
        ("id" = Uuid, Path, description = "The user to update")
    ),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Account updated", body = SetActiveResponse),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found", body = NotificationErrorResponse),
        (status = 500, description = "Internal server error", body = NotificationErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn set_user_active(
    Path(user_id): Path<Uuid>,
    Extension(admin): Extension<AuthUser>,
    Extension(users): Extension<Arc<dyn UserDirectory>>,
    Extension(notifications): Extension<Arc<NotificationStore>>,
    Json(request): Json<SetActiveRequest>,
) -> impl IntoResponse {
    info!(
        "Admin {} setting active={} on user {}",
        admin.user_id, request.active, user_id
    );

    match users.set_active(user_id, request.active).await {
        Ok(true) => {}
        Ok(false) => {
            return error_reply(StatusCode::NOT_FOUND, "User not found", "NOT_FOUND")
                .into_response()
        }
        Err(e) => {
            error!("Failed to update user {}: {}", user_id, e);
            return error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error",
                "DB_ERROR",
            )
            .into_response();
        }
    }

    let hidden_notifications = if request.active {
        0
    } else {
        match notifications.cascade_hide_for_actor(user_id, true).await {
            Ok(hidden) => hidden,
            Err(e) => {
                error!("Failed to hide notifications of user {}: {}", user_id, e);
                0
            }
        }
    };

    (
        StatusCode::OK,
        Json(SetActiveResponse {
            user_id,
            active: request.active,
            hidden_notifications,
        }),
    )
        .into_response()
}
