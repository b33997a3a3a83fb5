//! Medication CRUD endpoints for the caller's own medications.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::api::endpoints::require_user;
use crate::api::error::ApiError;
use crate::db::DatabaseError;
use crate::db::repository::medication::{
    self, Medication, MedicationInput, MedicationUpdate,
};
use crate::state::AppState;

#[derive(Serialize)]
pub struct MedicationsResponse {
    pub medications: Vec<Medication>,
}

#[derive(Serialize)]
pub struct MedicationResponse {
    pub data: Medication,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// `GET /api/medications` — all of the caller's medications.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MedicationsResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    let medications = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        medication::fetch_medications(&conn, &user_id)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))??;

    Ok(Json(MedicationsResponse { medications }))
}

/// `POST /api/medications` — create a medication.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<MedicationInput>,
) -> Result<Json<MedicationResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    let med = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        medication::insert_medication(&conn, &user_id, &input)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??;

    Ok(Json(MedicationResponse { data: med }))
}

/// `GET /api/medications/:id` — one medication.
pub async fn detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MedicationResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    let med = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        medication::fetch_medication(&conn, &id)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))??
    .filter(|med| med.user_id == user_id)
    .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    Ok(Json(MedicationResponse { data: med }))
}

/// `PUT /api/medications/:id` — partial update.
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<MedicationUpdate>,
) -> Result<Json<MedicationResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    let med = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        let existing = medication::fetch_medication(&conn, &id)?;
        match existing {
            Some(med) if med.user_id == user_id => {
                medication::update_medication(&conn, &id, &update).map(Some)
            }
            _ => Ok(None),
        }
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??
    .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    Ok(Json(MedicationResponse { data: med }))
}

/// `DELETE /api/medications/:id`.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<bool, DatabaseError> {
        let conn = worker.db()?;
        let existing = medication::fetch_medication(&conn, &id)?;
        match existing {
            Some(med) if med.user_id == user_id => {
                medication::delete_medication(&conn, &id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??;

    if !deleted {
        return Err(ApiError::NotFound("Medication not found".to_string()));
    }
    Ok(Json(DeleteResponse { success: true }))
}
