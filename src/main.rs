//! Price Feed Backend Server
//!
//! Serves real-time instrument prices over WebSocket, with a small REST
//! surface for instruments, history and fan-out statistics.

use anyhow::Context;
use price_feed_backend::api::build_app;
use price_feed_backend::config::Config;
use price_feed_backend::db::DatabasePool;
use price_feed_backend::state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;

    // Create application state
    let state = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let db = DatabasePool::connect(&url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            info!("Connected to database");
            AppState::with_database(config, db)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, prices are kept in memory only");
            AppState::from_config(config)
        }
    };
    let state = Arc::new(state);

    let scheduler = tokio::spawn(Arc::clone(&state.scheduler).run());

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    info!("Starting Price Feed Backend on {}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);

    let app = build_app(state);

    // Start the server
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    info!("Server stopped");

    Ok(())
}

/// Loads the configuration file named by `CONFIG_PATH` (built-in defaults
/// otherwise) and applies the environment overrides.
fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::var("CONFIG_PATH") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Config::load(&path).with_context(|| format!("failed to load {path}"))?
        }
        Err(_) => Config::default(),
    };

    if let Ok(host) = std::env::var("HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port
            .parse()
            .with_context(|| format!("PORT must be a valid number, got {port:?}"))?;
    }
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
