use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::middleware::auth_middleware;
use crate::notification::controller::{
    list_notifications, mark_clicked, mark_seen, unclicked_count,
};
use crate::notification::store::NotificationStore;

/// Create a router for the caller's notification feed
pub fn routes(store: Arc<NotificationStore>) -> Router {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unclicked-count", get(unclicked_count))
        .route("/api/notifications/clicked", post(mark_clicked))
        .route("/api/notifications/seen", post(mark_seen))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(store))
}
