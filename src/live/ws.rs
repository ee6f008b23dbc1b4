use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info};

use crate::auth::middleware::AuthUser;
use crate::live::{Connection, LiveChannel, LiveEvent, PresenceTracker};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_BUFFER: usize = 100;

/// Query parameters for WebSocket connections
#[derive(Debug, Deserialize)]
pub struct WebSocketParams {
    token: Option<String>,
}

/// Shared state of the live endpoint.
#[derive(Debug, Clone)]
pub struct LiveState {
    pub live: Arc<LiveChannel>,
    pub presence: Arc<PresenceTracker>,
}

/// Handle an invalid socket connection (authentication failure)
async fn handle_invalid_socket(mut socket: WebSocket, error_message: &str) {
    let body = serde_json::json!({ "error": error_message }).to_string();
    if let Err(e) = socket.send(Message::Text(body)).await {
        error!("Error sending error message on WS: {}", e);
    }
    let _ = socket.close().await;
}

/// Serve one authenticated socket until either side closes it.
async fn handle_valid_connection(socket: WebSocket, user: AuthUser, state: LiveState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<LiveEvent>(OUTBOUND_BUFFER);

    let connection = Connection::new(tx);
    let open = state.presence.connect(user.user_id);
    state.live.join_user_group(&connection, user.user_id);
    if let Some(device_id) = &user.device_id {
        state.live.join_device_group(&connection, device_id);
    }
    info!(
        "User {} connected to live channel ({} open connection(s))",
        user.user_id, open
    );

    // Forward live events and heartbeats to the socket
    let forward_task = tokio::spawn(async move {
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            let message = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            error!("Failed to serialize live event: {}", e);
                            continue;
                        }
                    },
                    None => break,
                },
                _ = heartbeat.tick() => Message::Ping(vec![]),
            };
            if let Err(e) = ws_sender.send(message).await {
                debug!("Error forwarding message to WebSocket: {}", e);
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket closed by client");
                break;
            }
            Ok(Message::Pong(_)) => debug!("Received pong from client"),
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.live.leave(connection.id);
    let remaining = state.presence.disconnect(user.user_id);
    forward_task.abort();

    info!(
        "Live connection closed for user {} ({} remaining)",
        user.user_id, remaining
    );
}

/// Upgrade to a live connection. The JWT comes in the `token` query
/// parameter and is verified before any group is joined.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketParams>,
    State(state): State<LiveState>,
) -> impl IntoResponse {
    let token = params.token.unwrap_or_default();

    match AuthUser::from_token(&token) {
        Some(user) => ws.on_upgrade(move |socket| handle_valid_connection(socket, user, state)),
        None => ws.on_upgrade(|socket| async move {
            handle_invalid_socket(socket, "Invalid token").await;
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_token, Role};
    use axum::{routing::get, Router};
    use std::net::{SocketAddr, TcpListener};
    use tokio_tungstenite::{connect_async, tungstenite};
    use uuid::Uuid;

    async fn serve(state: LiveState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        addr
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn state() -> LiveState {
        LiveState {
            live: Arc::new(LiveChannel::new(None)),
            presence: Arc::new(PresenceTracker::new()),
        }
    }

    #[tokio::test]
    async fn test_connection_tracks_presence_and_receives_events() {
        std::env::set_var("JWT_SECRET", "test_secret");
        let state = state();
        let addr = serve(state.clone()).await;
        let user_id = Uuid::new_v4();
        let token = generate_token(&user_id, Role::User, Some("tab-1")).unwrap();

        let (mut socket, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
            .await
            .unwrap();
        wait_until(|| state.presence.is_online(user_id)).await;
        assert!(state.presence.is_online(user_id));

        state
            .live
            .emit_to_device("tab-1", "channel:typing", &serde_json::json!({ "channel": 3 }))
            .await;
        let frame = socket.next().await.unwrap().unwrap();
        let event: LiveEvent = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(event.event, "channel:typing");
        assert_eq!(event.data["channel"], 3);

        socket.close(None).await.unwrap();
        wait_until(|| !state.presence.is_online(user_id)).await;
        assert!(!state.presence.is_online(user_id));
        assert_eq!(state.live.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_before_joining() {
        std::env::set_var("JWT_SECRET", "test_secret");
        let state = state();
        let addr = serve(state.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{}/ws?token=bogus", addr))
            .await
            .unwrap();
        let frame = socket.next().await.unwrap().unwrap();
        assert!(matches!(&frame, tungstenite::Message::Text(text) if text.contains("error")));
        assert_eq!(state.presence.online_count(), 0);
        assert_eq!(state.live.connection_count(), 0);
    }
}
