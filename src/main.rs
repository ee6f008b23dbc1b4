use axum::{routing::get, Router};
use redis::Client;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use realtime_notification_backend::api_doc::ApiDoc;
use realtime_notification_backend::app::AppServices;
use realtime_notification_backend::cache::redis::RedisCache;
use realtime_notification_backend::config::AppConfig;
use realtime_notification_backend::db::{self, PgStore};
use realtime_notification_backend::live::relay::run_relay;
use realtime_notification_backend::live::ws::LiveState;
use realtime_notification_backend::live::{LiveChannel, PresenceTracker};
use realtime_notification_backend::push::WebPushClient;
use realtime_notification_backend::routes;

const MAX_PORT_ATTEMPTS: u16 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_db_initialized(&pool).await {
        db::init_db(&pool).await?;
    }

    // Redis is optional; without it live events stay on this node
    let redis_cache = match &config.redis_url {
        Some(url) => {
            info!("Initializing Redis relay with URL: {}", url);
            match Client::open(url.clone()) {
                Ok(client) => Some(RedisCache::new(client)),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    None
                }
            }
        }
        None => {
            info!("No Redis URL configured, live events are local to this node");
            None
        }
    };

    let live = Arc::new(LiveChannel::new(redis_cache.clone()));
    if let Some(cache) = redis_cache {
        tokio::spawn(run_relay(live.clone(), cache));
    }
    let presence = Arc::new(PresenceTracker::new());

    let transport = Arc::new(WebPushClient::new(
        config.vapid_subject.clone(),
        config.push_timeout,
        config.push_ttl_secs,
    )?);

    let store = Arc::new(PgStore::new(pool.clone()));
    let services = AppServices::new(
        store,
        live.clone(),
        presence.clone(),
        transport,
        config.dispatch_settings(),
    );

    match services.keys.ensure_active_keys().await {
        Ok(keys) => info!("Push public key ready ({} chars)", keys.public_key.len()),
        Err(e) => error!("Failed to prepare push keys: {}", e),
    }

    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::routes(routes::health::HealthState {
            pool: pool.clone(),
            presence: presence.clone(),
        }))
        .merge(routes::notifications::routes(services.notifications.clone()))
        .merge(routes::push::routes(
            services.keys.clone(),
            services.subscriptions.clone(),
        ))
        .merge(routes::admin::routes(
            services.keys.clone(),
            services.users.clone(),
            services.notifications.clone(),
        ))
        .merge(routes::live::routes(LiveState { live, presence }))
        .route(
            "/",
            get(|| async { "Realtime Notification Backend API" }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Fall back to the next ports when the configured one is taken
    let mut port = config.port;
    for attempt in 1..=MAX_PORT_ATTEMPTS {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match axum::Server::try_bind(&addr) {
            Ok(server) => {
                info!("Server started at http://localhost:{}", port);
                info!("API documentation: http://localhost:{}/docs", port);
                info!(
                    "Live channel: ws://localhost:{}/api/live/ws?token=<JWT>",
                    port
                );
                return server
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| e.into());
            }
            Err(e) => {
                error!("Failed to bind port {}: {}", port, e);
                if attempt == MAX_PORT_ATTEMPTS {
                    break;
                }
                port += 1;
            }
        }
    }

    Err("Failed to bind to any port".into())
}
