//! The dose-reminder engine: the dispatch cycle that claims due
//! occurrences and fans out notifications, the handler for user actions
//! arriving back from the channels, and the missed-dose audit sweep.

pub mod action;
pub mod audit;
pub mod dispatcher;

use chrono::FixedOffset;
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Dose record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

/// Engine configuration, resolved once from the service config.
///
/// The reference offset is explicit so scheduling never depends on the
/// host machine's timezone.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub offset: FixedOffset,
    pub tolerance_minutes: i64,
    pub snooze_minutes: i64,
}
