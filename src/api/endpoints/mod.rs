//! Endpoint handlers, one module per resource.
//!
//! End-user authentication is an upstream concern (reverse proxy / identity
//! provider); per-user endpoints receive the caller's identity in the
//! `X-User-Id` header. The cron endpoints use a shared-secret bearer token
//! instead.

pub mod cron;
pub mod dose_logs;
pub mod medications;
pub mod notifications;
pub mod telegram;

use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::config;

/// Extract the authenticated user id injected by the upstream proxy.
pub(crate) fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /api/health` — liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: config::APP_VERSION,
    })
}
