#![forbid(unsafe_code)]

// Signaling module - WebSocket signaling server

pub mod connection;
pub mod protocol;
pub mod relay;

use crate::chat::ChatRelay;
use crate::config::ServerConfig;
use crate::lobby::LobbyBroadcaster;
use crate::metrics::ServerMetrics;
use crate::registry::ConnectionRegistry;
use crate::room::RoomManager;
use crate::turn::IceConfig;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay::SignalRelay;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Maximum inbound WebSocket frame size
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Signaling server state
#[derive(Clone)]
pub struct SignalingServer {
    rooms: Arc<RoomManager>,
    registry: ConnectionRegistry,
    relay: SignalRelay,
    chat: ChatRelay,
    ice: Arc<IceConfig>,
    metrics: ServerMetrics,
    connection_semaphore: Arc<Semaphore>,
    metrics_token: Option<String>,
    static_dir: String,
}

impl SignalingServer {
    /// Creates a new signaling server with empty state plus the configured system rooms
    pub fn new(config: &ServerConfig, metrics: ServerMetrics) -> Self {
        info!("Max connections: {}", config.max_connections);

        let registry = ConnectionRegistry::new();
        let lobby = LobbyBroadcaster::new(registry.clone());
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            lobby,
            metrics.clone(),
            config.system_rooms.clone(),
        ));
        let relay = SignalRelay::new(rooms.clone(), registry.clone(), metrics.clone());
        let chat = ChatRelay::new(rooms.clone(), registry.clone(), metrics.clone());

        Self {
            rooms,
            registry,
            relay,
            chat,
            ice: Arc::new(config.ice.clone()),
            metrics,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            metrics_token: config.metrics_token.clone(),
            static_dir: config.static_dir.clone(),
        }
    }

    pub fn room_manager(&self) -> Arc<RoomManager> {
        self.rooms.clone()
    }

    /// Creates the Axum router for the signaling server
    pub fn router(self) -> Router {
        let static_files = ServeDir::new(&self.static_dir);
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self)
            .layer(CorsLayer::permissive())
            .fallback_service(static_files)
    }

    /// Starts the signaling server on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener
    ///
    /// # Errors
    /// Returns an error if the server stops with an I/O failure
    pub async fn serve_on(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("Signaling server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Health check handler
async fn health_handler(State(server): State<SignalingServer>) -> Json<serde_json::Value> {
    let gauges = server.rooms.gauges().await;
    Json(serde_json::json!({
        "status": "ok",
        "rooms": gauges.user_rooms + gauges.system_rooms,
        "listeners": gauges.listeners,
        "connections": gauges.connections,
        "lobbySubscribers": gauges.lobby_subscribers,
    }))
}

/// Metrics handler, Prometheus text exposition format.
/// Protected by the optional METRICS_TOKEN (Bearer auth).
async fn metrics_handler(State(server): State<SignalingServer>, headers: HeaderMap) -> Response {
    if let Some(expected) = &server.metrics_token {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {expected}") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let gauges = server.rooms.gauges().await;
    let body = server.metrics.render_prometheus(&gauges);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(server): State<SignalingServer>) -> Response {
    // Acquire connection permit (non-blocking)
    let permit = match server.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Connection limit reached, rejecting WebSocket upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(|error| {
            warn!("WebSocket upgrade failed: {}", error);
        })
        .on_upgrade(move |socket| connection::handle_connection(socket, server, permit))
}
