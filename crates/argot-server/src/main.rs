use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use argot_api::{AppState, broadcast, crypto, history};
use argot_crypto::KeyManager;
use argot_relay::connection;
use argot_relay::rotation;
use argot_relay::{ConnectionRegistry, Relay};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argot=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("ARGOT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ARGOT_PORT")
        .unwrap_or_else(|_| "8000".into())
        .parse()?;
    let key_lifetime_secs: u64 = std::env::var("ARGOT_KEY_LIFETIME_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600); // 1 hour
    let rotation_interval_secs: u64 = std::env::var("ARGOT_ROTATION_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);
    let prune_interval_secs: u64 = std::env::var("ARGOT_PRUNE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);
    let key_lifetime = Duration::from_secs(key_lifetime_secs);

    // Shared state
    let keys = KeyManager::new();
    let relay = Relay::new(keys.clone(), ConnectionRegistry::new());

    // Mint the first key before anyone can connect.
    let (key_id, _) = keys.current_key().await;
    info!("Initial encryption key ready: {}", key_id);

    // Background schedules: rotation and retirement run independently.
    tokio::spawn(rotation::run_rotation_loop(
        keys.clone(),
        relay.clone(),
        rotation_interval_secs,
        key_lifetime,
    ));
    tokio::spawn(rotation::run_prune_loop(
        keys.clone(),
        prune_interval_secs,
        key_lifetime,
    ));

    let state = AppState {
        relay: relay.clone(),
        keys,
    };

    // Routes
    let admin_routes = Router::new()
        .route("/messages/history", get(history::get_history))
        .route("/broadcast/{sender}", post(broadcast::broadcast_message))
        .route("/crypto/keys", get(crypto::get_key_info))
        .route("/crypto/rotate", post(crypto::rotate_key))
        .route("/crypto/selftest", get(crypto::self_test))
        .with_state(state);

    let ws_routes = Router::new()
        .route("/ws/{username}", get(participant_upgrade))
        .route("/monitor/ws", get(observer_upgrade))
        .with_state(relay);

    let app = Router::new()
        .merge(admin_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Argot relay listening on {}", addr);
    info!(
        "Key lifetime: {}s, rotation check every {}s, retirement check every {}s",
        key_lifetime_secs, rotation_interval_secs, prune_interval_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn participant_upgrade(
    State(relay): State<Relay>,
    Path(username): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_participant(socket, username, relay))
}

async fn observer_upgrade(State(relay): State<Relay>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_observer(socket, relay))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
