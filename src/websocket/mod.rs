//! WebSocket surface
//!
//! The real-time control channel: one authenticated WebSocket per client.
//! The credential is verified before the upgrade completes, so a rejected
//! channel-open never allocates a session record, subprocess, or job.

pub mod protocol;
pub mod session;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use vantage_core::{SessionRegistry, TokenVerifier};

/// Maximum size of a single WS text message (1 MB).
const MAX_MESSAGE_BYTES: usize = 1_048_576;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    Extension(registry): Extension<SessionRegistry>,
    Extension(verifier): Extension<Arc<TokenVerifier>>,
) -> Response {
    let principal = match verifier.verify(query.token.as_deref().unwrap_or_default()) {
        Ok(principal) => principal,
        Err(e) => {
            warn!(error = %e, "websocket auth rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| session::handle_socket(socket, principal, registry))
        .into_response()
}
