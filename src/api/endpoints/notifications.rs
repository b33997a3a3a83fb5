//! Push subscription endpoints: the browser registers its subscription
//! here; the dispatcher clears it automatically when the endpoint reports
//! gone.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::endpoints::require_user;
use crate::api::error::ApiError;
use crate::db::repository::profile;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub subscription: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct SubscribeResponse {
    pub success: bool,
}

/// `POST /api/notifications/subscribe` — store the caller's push
/// subscription and enable the channel.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let Some(subscription) = request.subscription else {
        return Err(ApiError::BadRequest("Subscription data required".to_string()));
    };
    let subscription_json = subscription.to_string();

    let worker = state.clone();
    tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        profile::save_push_subscription(&conn, &user_id, &subscription_json)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??;

    Ok(Json(SubscribeResponse { success: true }))
}

/// `POST /api/notifications/unsubscribe` — clear the stored subscription.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let worker = state.clone();
    tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        profile::clear_push_subscription(&conn, &user_id)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("write task failed: {e}")))??;

    Ok(Json(SubscribeResponse { success: true }))
}
