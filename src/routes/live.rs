use axum::{routing::get, Router};

use crate::live::ws::{ws_handler, LiveState};

/// WebSocket endpoint; authenticates through the `token` query parameter
pub fn routes(state: LiveState) -> Router {
    Router::new()
        .route("/api/live/ws", get(ws_handler))
        .with_state(state)
}
