use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Security scheme configuration for OpenAPI
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// API documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Realtime Notification Backend API",
        version = "0.1.0",
        description = "Notification feed, Web Push subscriptions and admin controls"
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::health::protected_health_check,
        crate::notification::controller::list_notifications,
        crate::notification::controller::unclicked_count,
        crate::notification::controller::mark_clicked,
        crate::notification::controller::mark_seen,
        crate::push::controller::get_public_key,
        crate::push::controller::subscribe,
        crate::push::controller::unsubscribe,
        crate::push::controller::stage_candidate,
        crate::push::controller::rotate_keys,
        crate::users::controller::set_user_active
    ),
    components(
        schemas(
            crate::routes::health::HealthResponse,
            // Notification schemas
            crate::notification::model::Notification,
            crate::notification::model::NotificationType,
            crate::notification::model::NotificationReferences,
            crate::notification::model::NotificationListResponse,
            crate::notification::model::UnclickedCountResponse,
            crate::notification::model::MarkClickedRequest,
            crate::notification::model::UpdatedResponse,
            crate::notification::model::NotificationErrorResponse,
            crate::notification::controller::NotificationsQueryParams,
            // Push schemas
            crate::push::model::KeyVersion,
            crate::push::model::Subscription,
            crate::push::model::SubscriptionKeys,
            crate::push::model::SubscribeRequest,
            crate::push::model::UnsubscribeRequest,
            crate::push::model::PublicKeyResponse,
            crate::push::model::RotateResponse,
            crate::push::model::PushErrorResponse,
            // Admin schemas
            crate::users::model::SetActiveRequest,
            crate::users::model::SetActiveResponse,
            // External type schemas
            crate::schema_ext::DateTimeWrapper,
            crate::schema_ext::UuidWrapper
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "notifications", description = "Notification feed endpoints"),
        (name = "push", description = "Web Push keys and subscriptions"),
        (name = "admin", description = "Administrative endpoints")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/health",
            "/api/notifications",
            "/api/notifications/unclicked-count",
            "/api/push/subscriptions",
            "/api/admin/push/keys/rotate",
            "/api/admin/users/{id}/active",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
