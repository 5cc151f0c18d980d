//! HTTP API
//!
//! The thin credential-exchange surface: trade the admin password for a
//! bearer token, plus an authenticated liveness probe. Everything
//! interactive happens over the WebSocket channel.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use vantage_core::TokenVerifier;

use crate::server::AgentConfig;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// `POST /api/login`: exchange the admin password for a 24h bearer token.
pub async fn login(
    Extension(verifier): Extension<Arc<TokenVerifier>>,
    Extension(config): Extension<Arc<AgentConfig>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    if request.password != config.admin_password {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let token = verifier.issue("admin").map_err(|e| {
        warn!(error = %e, "token mint failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(LoginResponse {
        success: true,
        token,
    }))
}

/// `GET /api/health`: authenticated liveness probe.
pub async fn health(
    Extension(verifier): Extension<Arc<TokenVerifier>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    verifier
        .verify(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok(Json(json!({ "status": "ok", "time": Utc::now() })))
}
