use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::middleware::auth_middleware;
use crate::push::controller::{get_public_key, subscribe, unsubscribe};
use crate::push::{PushKeyStore, SubscriptionRegistry};

pub fn routes(keys: Arc<PushKeyStore>, registry: Arc<SubscriptionRegistry>) -> Router {
    let public_routes = Router::new().route("/api/push/public-key", get(get_public_key));

    let private_routes = Router::new()
        .route("/api/push/subscriptions", post(subscribe).delete(unsubscribe))
        .route_layer(middleware::from_fn(auth_middleware));

    public_routes
        .merge(private_routes)
        .layer(Extension(keys))
        .layer(Extension(registry))
}
