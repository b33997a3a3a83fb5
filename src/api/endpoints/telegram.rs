//! Telegram webhook and test-message endpoints.
//!
//! The webhook receives bot updates; callback queries (reminder button
//! presses) are parsed into typed actions, applied to the dose record, and
//! acknowledged — the original message is edited to drop its action
//! buttons and show the resulting status, so a second press of a stale
//! button cannot re-apply the action.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::endpoints::require_user;
use crate::api::error::ApiError;
use crate::db::repository::profile;
use crate::notify::telegram::{
    self, CallbackAction, TelegramClient, FAILED_REPLY, SKIPPED_REPLY, TAKEN_REPLY,
};
use crate::reminder::action::{self, DoseAction};
use crate::state::AppState;

// ───────────────────────────────────────────────────────────────────────
// Update payload (the subset of the Bot API shape this service reads)
// ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRef {
    pub id: i64,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub success: bool,
}

/// `POST /api/telegram/webhook` — bot update receiver.
///
/// Always answers 200 so Telegram does not redeliver; failures inside a
/// callback are reported to the user through the callback acknowledgment.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(callback) = update.callback_query {
        handle_callback(state, callback).await?;
    } else if update.message.is_some() {
        // Plain chat messages (e.g. account-connect flows) are handled by
        // an external integration; nothing to do here.
        tracing::debug!("Ignoring non-callback Telegram update");
    }

    Ok(Json(WebhookResponse { success: true }))
}

async fn handle_callback(state: Arc<AppState>, callback: CallbackQuery) -> Result<(), ApiError> {
    let Some(data) = callback.data else {
        return Ok(());
    };
    let Some((kind, occurrence_id)) = telegram::decode_callback(&data) else {
        tracing::warn!(data = %data, "Ignoring unrecognized callback payload");
        return Ok(());
    };
    let occurrence_id = occurrence_id.to_string();

    let dose_action = match kind {
        CallbackAction::Take => DoseAction::Take,
        CallbackAction::Skip => DoseAction::Skip,
        CallbackAction::Snooze => DoseAction::Snooze {
            minutes: state.config.default_snooze_minutes,
            reason: None,
        },
    };

    let now = Utc::now();
    let worker = state.clone();
    let action_for_worker = dose_action.clone();
    let occurrence_for_worker = occurrence_id.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = worker.db()?;
        action::apply_action(&mut conn, &occurrence_for_worker, &action_for_worker, now)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("action task failed: {e}")))?;

    let applied = outcome.is_ok();
    let reply = match &outcome {
        Ok(_) => reply_for(&dose_action),
        Err(e) => {
            tracing::warn!(
                occurrence_id = %occurrence_id,
                "Failed to apply channel action: {e}"
            );
            FAILED_REPLY.to_string()
        }
    };

    acknowledge(&state, callback.id, callback.message, reply, applied).await;
    Ok(())
}

fn reply_for(action: &DoseAction) -> String {
    match action {
        DoseAction::Take => TAKEN_REPLY.to_string(),
        DoseAction::Skip => SKIPPED_REPLY.to_string(),
        DoseAction::Snooze { minutes, .. } => telegram::snoozed_reply(*minutes),
    }
}

/// Answer the callback query and, when the action was applied, edit the
/// original message to drop the buttons. Acknowledgment failures are
/// logged, never propagated — the record update already committed.
async fn acknowledge(
    state: &Arc<AppState>,
    callback_id: String,
    message: Option<CallbackMessage>,
    reply: String,
    applied: bool,
) {
    let Some(client) = state.telegram.clone() else {
        tracing::warn!("Telegram client not configured; callback not acknowledged");
        return;
    };

    let ack = tokio::task::spawn_blocking(move || {
        if let Err(e) = client.answer_callback(&callback_id, &reply) {
            tracing::warn!("Failed to answer callback query: {e}");
        }
        if !applied {
            return;
        }
        if let Some(message) = message {
            let text = match &message.text {
                Some(original) => format!("{original}\n\n{reply}"),
                None => reply.clone(),
            };
            if let Err(e) =
                client.edit_message_text(&message.chat.id.to_string(), message.message_id, &text)
            {
                tracing::warn!("Failed to edit reminder message: {e}");
            }
        }
    })
    .await;

    if let Err(e) = ack {
        tracing::warn!("Acknowledgment task failed: {e}");
    }
}

// ───────────────────────────────────────────────────────────────────────
// Test message
// ───────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TestMessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/telegram/test` — send a connectivity test to the caller's
/// connected chat, with user-facing guidance on common Bot API failures.
pub async fn test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TestMessageResponse>, ApiError> {
    let user_id = require_user(&headers)?;

    let Some(client) = state.telegram.clone() else {
        return Ok(Json(TestMessageResponse {
            success: false,
            error: Some(
                "Telegram bot not configured - check TELEGRAM_BOT_TOKEN".to_string(),
            ),
        }));
    };

    let worker = state.clone();
    let channels = tokio::task::spawn_blocking(move || {
        let conn = worker.db()?;
        profile::fetch_channels(&conn, &user_id)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))??;

    let Some(chat_id) = channels.telegram_chat_id else {
        return Ok(Json(TestMessageResponse {
            success: false,
            error: Some(
                "No Telegram chat connected. Link your account from the app first.".to_string(),
            ),
        }));
    };

    let result =
        tokio::task::spawn_blocking(move || send_test(&client, &chat_id))
            .await
            .map_err(|e| ApiError::Internal(format!("send task failed: {e}")))?;

    Ok(Json(result))
}

fn send_test(client: &TelegramClient, chat_id: &str) -> TestMessageResponse {
    match client.send_test_message(chat_id) {
        Ok(()) => TestMessageResponse {
            success: true,
            error: None,
        },
        Err(e) => TestMessageResponse {
            success: false,
            error: Some(telegram::describe_send_failure(&e)),
        },
    }
}
