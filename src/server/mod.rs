//! Agent server
//!
//! Builds the shared state, starts the process-scoped telemetry jobs, and
//! serves the HTTP + WebSocket surface until ctrl-c. Process-scoped jobs are
//! cancelled only here, on shutdown; channel-scoped jobs die with their
//! channel via the session registry.

mod config;

pub use config::AgentConfig;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use vantage_core::{jobs, SessionRegistry, SystemMetrics, TelemetryAggregator, TokenVerifier};

use crate::api;
use crate::websocket;

/// Run the agent until ctrl-c.
pub async fn run(config: AgentConfig) -> Result<()> {
    let config = Arc::new(config);
    let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret));
    let registry = SessionRegistry::new();

    // Process-scoped telemetry: slow refresh caches disk/network, fast
    // refresh merges and broadcasts to every channel. Both survive for the
    // life of the process regardless of any single channel's state.
    let aggregator = Arc::new(TelemetryAggregator::new(
        Arc::new(SystemMetrics),
        registry.clone(),
    ));
    let slow = {
        let aggregator = aggregator.clone();
        jobs::schedule("telemetry-slow", config.telemetry_slow_interval, move || {
            let aggregator = aggregator.clone();
            async move { aggregator.refresh_slow().await }
        })
    };
    let fast = {
        let aggregator = aggregator.clone();
        jobs::schedule("telemetry-fast", config.telemetry_fast_interval, move || {
            let aggregator = aggregator.clone();
            async move { aggregator.refresh_fast().await }
        })
    };

    let app = Router::new()
        .route("/api/login", post(api::login))
        .route("/api/health", get(api::health))
        .route("/ws", get(websocket::ws_handler))
        .layer(Extension(registry.clone()))
        .layer(Extension(verifier))
        .layer(Extension(config.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "agent listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    fast.cancel();
    slow.cancel();
    info!("agent stopped");
    Ok(())
}
