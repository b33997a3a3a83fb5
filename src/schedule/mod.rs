//! Pure schedule math: clock-time parsing, due-window matching and
//! occurrence identity. No storage or I/O — everything here is
//! deterministic in its inputs, which is what makes the dispatch cycle
//! idempotent and testable.

pub mod occurrence;
pub mod window;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid clock time (expected HH:MM): {0}")]
    InvalidClockTime(String),
}
