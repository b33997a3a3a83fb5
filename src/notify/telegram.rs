//! Telegram Bot API client: dose reminders with inline action buttons,
//! callback acknowledgment and message editing.
//!
//! Callback data crosses the wire as `ACTION:occurrence_id` and is parsed
//! into a typed [`CallbackAction`] at this boundary — nothing outside this
//! module handles the colon-joined form.

use serde::{Deserialize, Serialize};

use super::{ChannelKind, DoseReminder, ReminderChannel, SendError};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Status texts shown to the user after a button press.
pub const TAKEN_REPLY: &str = "✅ Medication taken";
pub const SKIPPED_REPLY: &str = "❌ Medication skipped";
pub const FAILED_REPLY: &str = "Failed to update status";

pub fn snoozed_reply(minutes: i64) -> String {
    format!("💤 Snoozed for {minutes} minutes")
}

// ───────────────────────────────────────────────────────────────────────
// Callback encoding
// ───────────────────────────────────────────────────────────────────────

/// The action behind a reminder button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Take,
    Skip,
    Snooze,
}

impl CallbackAction {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Take => "TAKE",
            Self::Skip => "SKIP",
            Self::Snooze => "SNOOZE",
        }
    }
}

/// Serialize an action for `callback_data`.
pub fn encode_callback(action: CallbackAction, occurrence_id: &str) -> String {
    format!("{}:{}", action.wire_name(), occurrence_id)
}

/// Parse incoming `callback_data`. Returns `None` for anything that is not
/// a well-formed reminder action.
pub fn decode_callback(data: &str) -> Option<(CallbackAction, &str)> {
    let (action, occurrence_id) = data.split_once(':')?;
    if occurrence_id.is_empty() {
        return None;
    }
    let action = match action {
        "TAKE" => CallbackAction::Take,
        "SKIP" => CallbackAction::Skip,
        "SNOOZE" => CallbackAction::Snooze,
        _ => return None,
    };
    Some((action, occurrence_id))
}

// ───────────────────────────────────────────────────────────────────────
// Wire types
// ───────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup>,
}

#[derive(Serialize)]
struct ReplyMarkup {
    inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Serialize)]
struct InlineButton {
    text: String,
    callback_data: String,
}

#[derive(Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct EditMessageRequest<'a> {
    chat_id: &'a str,
    message_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

// ───────────────────────────────────────────────────────────────────────
// Client
// ───────────────────────────────────────────────────────────────────────

/// Bot API client. Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct TelegramClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(TELEGRAM_API_BASE, token)
    }

    /// Point the client at a different API host (for tests).
    pub fn with_base_url(base_url: &str, token: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn call<B: Serialize>(&self, method: &str, body: &B) -> Result<(), SendError> {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let parsed: ApiResponse = response
            .json()
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if parsed.ok {
            Ok(())
        } else {
            Err(SendError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| "unknown Telegram error".to_string()),
            ))
        }
    }

    /// Send a dose reminder with Take / Skip / Snooze buttons.
    pub fn send_reminder_message(
        &self,
        chat_id: &str,
        reminder: &DoseReminder,
    ) -> Result<(), SendError> {
        let request = SendMessageRequest {
            chat_id,
            text: reminder_text(reminder),
            parse_mode: "Markdown",
            reply_markup: Some(ReplyMarkup {
                inline_keyboard: vec![
                    vec![
                        InlineButton {
                            text: "✅ Take".to_string(),
                            callback_data: encode_callback(
                                CallbackAction::Take,
                                &reminder.occurrence_id,
                            ),
                        },
                        InlineButton {
                            text: "❌ Skip".to_string(),
                            callback_data: encode_callback(
                                CallbackAction::Skip,
                                &reminder.occurrence_id,
                            ),
                        },
                    ],
                    vec![InlineButton {
                        text: format!("💤 Snooze {}m", reminder.snooze_minutes),
                        callback_data: encode_callback(
                            CallbackAction::Snooze,
                            &reminder.occurrence_id,
                        ),
                    }],
                ],
            }),
        };
        self.call("sendMessage", &request)
    }

    /// Answer a callback query (stops the client-side loading spinner).
    pub fn answer_callback(&self, callback_query_id: &str, text: &str) -> Result<(), SendError> {
        self.call(
            "answerCallbackQuery",
            &AnswerCallbackRequest {
                callback_query_id,
                text,
            },
        )
    }

    /// Replace a delivered message's text, dropping its inline keyboard so
    /// the same action cannot be pressed twice.
    pub fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<(), SendError> {
        self.call(
            "editMessageText",
            &EditMessageRequest {
                chat_id,
                message_id,
                text,
            },
        )
    }

    /// Send a connectivity test message to a chat.
    pub fn send_test_message(&self, chat_id: &str) -> Result<(), SendError> {
        let request = SendMessageRequest {
            chat_id,
            text: "✅ *Test successful!*\n\nYour Telegram notifications are working \
                   correctly. You will receive medication reminders here."
                .to_string(),
            parse_mode: "Markdown",
            reply_markup: None,
        };
        self.call("sendMessage", &request)
    }
}

impl ReminderChannel for TelegramClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn send_reminder(&self, target: &str, reminder: &DoseReminder) -> Result<(), SendError> {
        self.send_reminder_message(target, reminder)
    }
}

fn reminder_text(reminder: &DoseReminder) -> String {
    let mut text = format!(
        "🔔 *Medication Reminder*\n\n💊 *{}*\n",
        reminder.medication_name
    );
    if !reminder.dosage.is_empty() {
        text.push_str(&format!("📋 Dosage: {}\n", reminder.dosage));
    }
    text.push_str(&format!(
        "⏰ Scheduled for: {}\n\nPlease take your medication now!",
        reminder.time_label
    ));
    text
}

/// Translate a Bot API rejection into user-facing guidance.
pub fn describe_send_failure(error: &SendError) -> String {
    let SendError::Api(description) = error else {
        return format!("Failed to send test message: {error}");
    };

    if description.contains("chat not found") {
        "Chat not found. Please start a conversation with the bot by sending /start \
         on Telegram first."
            .to_string()
    } else if description.contains("bot was blocked") {
        "You have blocked this bot. Please unblock it on Telegram and try again.".to_string()
    } else if description.contains("user is deactivated") {
        "This Telegram account is deactivated.".to_string()
    } else if description.contains("Unauthorized") {
        "Bot token is invalid. Please check your TELEGRAM_BOT_TOKEN configuration.".to_string()
    } else {
        format!("Telegram API error: {description}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder() -> DoseReminder {
        DoseReminder {
            occurrence_id: "med-1_2024-01-01_0800".to_string(),
            medication_id: "med-1".to_string(),
            medication_name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            time_label: "08:00".to_string(),
            snooze_minutes: 10,
        }
    }

    #[test]
    fn callback_roundtrip() {
        let encoded = encode_callback(CallbackAction::Take, "med-1_2024-01-01_0800");
        assert_eq!(encoded, "TAKE:med-1_2024-01-01_0800");

        let (action, id) = decode_callback(&encoded).unwrap();
        assert_eq!(action, CallbackAction::Take);
        assert_eq!(id, "med-1_2024-01-01_0800");
    }

    #[test]
    fn decode_rejects_malformed_data() {
        assert!(decode_callback("TAKE").is_none());
        assert!(decode_callback("TAKE:").is_none());
        assert!(decode_callback("NUKE:med-1").is_none());
        assert!(decode_callback("").is_none());
    }

    #[test]
    fn decode_keeps_id_with_separators_intact() {
        // Occurrence ids contain no colons, but splitting only on the first
        // colon keeps the rest of the payload untouched regardless.
        let (action, id) = decode_callback("SNOOZE:a_2024-01-01_0800").unwrap();
        assert_eq!(action, CallbackAction::Snooze);
        assert_eq!(id, "a_2024-01-01_0800");
    }

    #[test]
    fn reminder_text_includes_details() {
        let text = reminder_text(&reminder());
        assert!(text.contains("Metformin"));
        assert!(text.contains("500mg"));
        assert!(text.contains("08:00"));
    }

    #[test]
    fn reminder_text_omits_empty_dosage() {
        let mut r = reminder();
        r.dosage = String::new();
        let text = reminder_text(&r);
        assert!(!text.contains("Dosage"));
    }

    #[test]
    fn send_failure_descriptions() {
        let chat_missing = SendError::Api("Bad Request: chat not found".to_string());
        assert!(describe_send_failure(&chat_missing).contains("/start"));

        let blocked = SendError::Api("Forbidden: bot was blocked by the user".to_string());
        assert!(describe_send_failure(&blocked).contains("unblock"));

        let bad_token = SendError::Api("Unauthorized".to_string());
        assert!(describe_send_failure(&bad_token).contains("TELEGRAM_BOT_TOKEN"));

        let other = SendError::Api("flood control".to_string());
        assert!(describe_send_failure(&other).contains("flood control"));

        let transport = SendError::Transport("connection refused".to_string());
        assert!(describe_send_failure(&transport).contains("connection refused"));
    }

    #[test]
    fn endpoint_includes_token_and_method() {
        let client = TelegramClient::with_base_url("https://example.test/", "123:abc");
        assert_eq!(
            client.endpoint("sendMessage"),
            "https://example.test/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn snoozed_reply_names_minutes() {
        assert_eq!(snoozed_reply(15), "💤 Snoozed for 15 minutes");
    }
}
