use axum::{
    body::Body,
    extract::Extension,
    http::Request,
    middleware::{self, Next},
    routing::{post, put},
    Router,
};
use std::sync::Arc;

use crate::auth::jwt::Role;
use crate::auth::middleware::{auth_middleware, require_role};
use crate::notification::store::NotificationStore;
use crate::push::controller::{rotate_keys, stage_candidate};
use crate::push::PushKeyStore;
use crate::users::controller::set_user_active;
use crate::users::UserDirectory;

/// Admin-only routes: key rotation and account activation
pub fn routes(
    keys: Arc<PushKeyStore>,
    users: Arc<dyn UserDirectory>,
    notifications: Arc<NotificationStore>,
) -> Router {
    Router::new()
        .route("/api/admin/push/keys/candidate", post(stage_candidate))
        .route("/api/admin/push/keys/rotate", post(rotate_keys))
        .route("/api/admin/users/:id/active", put(set_user_active))
        // Layers run bottom-up: authenticate, then check the role
        .route_layer(middleware::from_fn(|req: Request<Body>, next: Next<Body>| {
            require_role(Role::Admin, req, next)
        }))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(keys))
        .layer(Extension(users))
        .layer(Extension(notifications))
}
