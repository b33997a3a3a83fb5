//! Cron-triggered endpoints: the reminder dispatch cycle and the
//! missed-dose audit sweep. Both are invoked on a fixed interval by an
//! external scheduler and guarded by the shared `CRON_SECRET` bearer token.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::config::AppConfig;
use crate::reminder::{audit, dispatcher};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CycleResponse {
    pub success: bool,
    pub processed: usize,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub success: bool,
    pub missed: usize,
}

fn authorize(config: &AppConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = &config.cron_secret else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(secret.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// `GET /api/cron/reminders` — run one dispatch cycle.
pub async fn reminders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CycleResponse>, ApiError> {
    authorize(&state.config, &headers)?;

    let now = Utc::now();
    let worker = state.clone();
    let report = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        dispatcher::run_cycle(&conn, &worker.notifier, &worker.dispatch_config(), now)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("dispatch task failed: {e}")))??;

    Ok(Json(CycleResponse {
        success: true,
        processed: report.processed,
    }))
}

/// `GET /api/cron/audit` — backfill missed records for elapsed doses.
pub async fn audit_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuditResponse>, ApiError> {
    authorize(&state.config, &headers)?;

    let now = Utc::now();
    let worker = state.clone();
    let missed = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        audit::sweep_missed(
            &conn,
            &worker.dispatch_config(),
            worker.config.missed_after_minutes,
            now,
        )
    })
    .await
    .map_err(|e| ApiError::Internal(format!("audit task failed: {e}")))??;

    Ok(Json(AuditResponse {
        success: true,
        missed,
    }))
}
