#![forbid(unsafe_code)]

use anyhow::Result;
use onair::config::ServerConfig;
use onair::metrics::ServerMetrics;
use onair::signaling::SignalingServer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "onair=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("On-air rooms - Starting server");

    let config = ServerConfig::from_env()?;
    info!("{} system room(s) configured", config.system_rooms.len());
    if let Some(turn) = &config.ice.turn {
        info!("TURN configured: {} URL(s), TTL {}s", turn.urls.len(), turn.ttl_secs);
    } else {
        info!("No TURN configured (set TURN_URLS and TURN_SECRET to enable)");
    }

    let metrics = ServerMetrics::new();
    let signaling_server = SignalingServer::new(&config, metrics);
    let room_manager = signaling_server.room_manager();

    info!("Starting signaling server on port {}", config.port);

    // Run server with graceful shutdown
    tokio::select! {
        result = signaling_server.serve(config.port) => {
            if let Err(e) = result {
                tracing::error!("Signaling server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            room_manager.shutdown().await;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
