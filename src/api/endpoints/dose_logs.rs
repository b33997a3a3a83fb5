//! Dose-log endpoints: listing for the adherence views and the upsert
//! write path (manual logging from the app, or a dose logged before the
//! reminder fired — which claims the occurrence so the dispatcher will
//! not re-notify it).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::require_user;
use crate::api::error::ApiError;
use crate::db::repository::dose_log::{
    self, DoseLog, DoseLogFilter, DoseLogWrite, DoseStatus,
};
use crate::db::repository::medication;
use crate::db::DatabaseError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DoseLogQuery {
    pub medication_id: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseLogsResponse {
    pub dose_logs: Vec<DoseLog>,
}

/// `GET /api/dose-logs` — the caller's dose history, optionally filtered.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DoseLogQuery>,
) -> Result<Json<DoseLogsResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let status = query
        .status
        .as_deref()
        .map(|s| {
            DoseStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {s}")))
        })
        .transpose()?;

    let filter = DoseLogFilter {
        medication_id: query.medication_id,
        status,
        from: query.from,
        to: query.to,
    };

    let worker = state.clone();
    let dose_logs = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        dose_log::list_dose_logs(&conn, &user_id, &filter)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))??;

    Ok(Json(DoseLogsResponse { dose_logs }))
}

/// Upsert payload. The record's owner is derived from the medication, not
/// trusted from the request.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseLogWriteRequest {
    pub id: String,
    pub medication_id: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub actual_time: Option<DateTime<Utc>>,
    pub status: DoseStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub delayed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delay_count: Option<i64>,
    #[serde(default)]
    pub delay_reason: Option<String>,
}

#[derive(Serialize)]
pub struct DoseLogResponse {
    pub data: DoseLog,
}

/// `POST /api/dose-logs/create` — upsert by occurrence id; the supply
/// adjustment for `taken` transitions is applied server-side.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DoseLogWriteRequest>,
) -> Result<Json<DoseLogResponse>, ApiError> {
    let worker = state.clone();
    let log = tokio::task::spawn_blocking(move || {
        let mut conn = worker.db()?;
        let med = medication::fetch_medication(&conn, &request.medication_id)?.ok_or_else(
            || DatabaseError::NotFound {
                entity: "medication".to_string(),
                id: request.medication_id.clone(),
            },
        )?;

        let write = DoseLogWrite {
            id: request.id,
            user_id: med.user_id,
            medication_id: request.medication_id,
            scheduled_time: request.scheduled_time,
            actual_time: request.actual_time,
            status: request.status,
            notes: request.notes,
            delayed_until: request.delayed_until,
            delay_count: request.delay_count,
            delay_reason: request.delay_reason,
        };
        dose_log::upsert_dose_log(&mut conn, &write)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??;

    Ok(Json(DoseLogResponse { data: log }))
}
