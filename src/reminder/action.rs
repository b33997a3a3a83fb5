//! Action handler: applies take / skip / snooze responses arriving
//! asynchronously from the notification channels (or the app UI) to the
//! dose record, with the supply rule riding along in the same transaction.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::repository::dose_log::{self, DoseLog, DoseStatus, StatusChange};
use crate::db::DatabaseError;

use super::ReminderError;

/// A user's response to a dose reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoseAction {
    Take,
    Skip,
    Snooze {
        minutes: i64,
        reason: Option<String>,
    },
}

/// Apply a user action to an occurrence.
///
/// Take/Skip stamp `actual_time = now` and cross the `taken` boundary where
/// applicable; Snooze moves the record to `delayed` with
/// `delayed_until = now + minutes` and bumps `delay_count` once, at snooze
/// time. All-or-nothing: if the record write fails, nothing changes.
pub fn apply_action(
    conn: &mut Connection,
    occurrence_id: &str,
    action: &DoseAction,
    now: DateTime<Utc>,
) -> Result<DoseLog, ReminderError> {
    let change = match action {
        DoseAction::Take => StatusChange {
            status: DoseStatus::Taken,
            actual_time: Some(now),
            delayed_until: None,
            bump_delay_count: false,
            delay_reason: None,
        },
        DoseAction::Skip => StatusChange {
            status: DoseStatus::Skipped,
            actual_time: Some(now),
            delayed_until: None,
            bump_delay_count: false,
            delay_reason: None,
        },
        DoseAction::Snooze { minutes, reason } => {
            if *minutes <= 0 {
                return Err(ReminderError::InvalidAction(format!(
                    "snooze minutes must be positive, got {minutes}"
                )));
            }
            StatusChange {
                status: DoseStatus::Delayed,
                actual_time: None,
                delayed_until: Some(now + Duration::minutes(*minutes)),
                bump_delay_count: true,
                delay_reason: reason.clone(),
            }
        }
    };

    dose_log::apply_status_change(conn, occurrence_id, &change).map_err(|e| match e {
        DatabaseError::NotFound { .. } => ReminderError::RecordNotFound(occurrence_id.to_string()),
        other => ReminderError::Database(other),
    })
}
