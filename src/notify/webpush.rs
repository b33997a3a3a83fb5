//! Web push delivery through the narrow interface the engine needs: POST
//! the reminder payload JSON to the user's stored subscription endpoint
//! and distinguish "endpoint gone" from other failures so the caller can
//! clear a dead subscription.
//!
//! VAPID signing and payload encryption are the push relay's concern and
//! live outside this service.

use serde::{Deserialize, Serialize};

use super::{ChannelKind, DoseReminder, ReminderChannel, SendError};

const REQUEST_TIMEOUT_SECS: u64 = 10;
const PUSH_TTL_SECS: &str = "60";
const DEFAULT_ICON: &str = "/icon-192.png";

/// The stored subscription document. Extra fields (e.g. crypto keys) are
/// carried opaquely for the relay; only the endpoint matters here.
#[derive(Debug, Deserialize)]
struct PushSubscription {
    endpoint: String,
}

/// Payload shape the service-worker click handler understands.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub url: String,
    pub medication_id: String,
    pub log_id: String,
}

/// Build the reminder payload for one dose occurrence. The tag makes a
/// re-delivered reminder replace the displayed one instead of stacking.
pub fn reminder_payload(reminder: &DoseReminder) -> PushPayload {
    let mut body = format!("Time to take {}", reminder.medication_name);
    if !reminder.dosage.is_empty() {
        body.push_str(&format!(" ({})", reminder.dosage));
    }
    body.push_str(&format!("\nScheduled for {}", reminder.time_label));

    PushPayload {
        title: "💊 Medication Reminder".to_string(),
        body,
        icon: DEFAULT_ICON.to_string(),
        badge: DEFAULT_ICON.to_string(),
        tag: format!("med-{}-{}", reminder.medication_id, reminder.occurrence_id),
        require_interaction: true,
        url: format!("/dashboard/medications/{}", reminder.medication_id),
        medication_id: reminder.medication_id.clone(),
        log_id: reminder.occurrence_id.clone(),
    }
}

/// Push delivery client.
pub struct PushClient {
    client: reqwest::blocking::Client,
}

impl PushClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Deliver a payload to a stored subscription.
    ///
    /// HTTP 404/410 mean the subscription no longer exists and map to
    /// [`SendError::Gone`].
    pub fn deliver(&self, subscription_json: &str, payload: &PushPayload) -> Result<(), SendError> {
        let subscription: PushSubscription = serde_json::from_str(subscription_json)
            .map_err(|e| SendError::NotConfigured(format!("malformed push subscription: {e}")))?;

        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", PUSH_TTL_SECS)
            .json(payload)
            .send()
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 {
            Err(SendError::Gone)
        } else if status.is_success() {
            Ok(())
        } else {
            Err(SendError::Api(format!(
                "push endpoint returned HTTP {}",
                status.as_u16()
            )))
        }
    }
}

impl Default for PushClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderChannel for PushClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebPush
    }

    fn send_reminder(&self, target: &str, reminder: &DoseReminder) -> Result<(), SendError> {
        self.deliver(target, &reminder_payload(reminder))
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
    fn payload_carries_routing_ids() {
        let payload = reminder_payload(&reminder());
        assert_eq!(payload.medication_id, "med-1");
        assert_eq!(payload.log_id, "med-1_2024-01-01_0800");
        assert_eq!(payload.url, "/dashboard/medications/med-1");
        assert_eq!(payload.tag, "med-med-1-med-1_2024-01-01_0800");
        assert!(payload.require_interaction);
    }

    #[test]
    fn payload_body_mentions_dose() {
        let payload = reminder_payload(&reminder());
        assert!(payload.body.contains("Metformin"));
        assert!(payload.body.contains("(500mg)"));
        assert!(payload.body.contains("08:00"));
    }

    #[test]
    fn payload_omits_empty_dosage() {
        let mut r = reminder();
        r.dosage = String::new();
        let payload = reminder_payload(&r);
        assert!(!payload.body.contains("()"));
    }

    #[test]
    fn payload_serializes_camel_case() {
        let json = serde_json::to_string(&reminder_payload(&reminder())).unwrap();
        assert!(json.contains("\"medicationId\""));
        assert!(json.contains("\"logId\""));
        assert!(json.contains("\"requireInteraction\""));
    }

    #[test]
    fn malformed_subscription_is_not_configured() {
        let client = PushClient::new();
        let err = client
            .deliver("not json", &reminder_payload(&reminder()))
            .unwrap_err();
        assert!(matches!(err, SendError::NotConfigured(_)));
    }
}
