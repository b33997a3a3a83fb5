//! Time-window matcher: decides whether a scheduled clock time is due at
//! a given instant, in an explicitly configured reference timezone.
//!
//! The reference offset is always passed in; deriving it from the host
//! clock would couple correctness to the deployment environment.

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};

use super::ScheduleError;

pub const MINUTES_PER_DAY: i64 = 1440;

/// A wall-clock time of day ("HH:MM", 24-hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    hours: u32,
    minutes: u32,
}

impl ClockTime {
    /// Parse a strict `HH:MM` 24-hour string.
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidClockTime(s.to_string());

        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hours: u32 = h.parse().map_err(|_| invalid())?;
        let minutes: u32 = m.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(Self { hours, minutes })
    }

    pub fn minutes_from_midnight(self) -> i64 {
        i64::from(self.hours) * 60 + i64::from(self.minutes)
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hours, self.minutes, 0).unwrap_or_default()
    }

    /// Colon-free form used inside occurrence ids ("0800").
    pub fn compact(self) -> String {
        format!("{:02}{:02}", self.hours, self.minutes)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hours, self.minutes)
    }
}

/// Minutes since midnight of `now` in the reference timezone, normalized
/// into `[0, 1440)`.
pub fn local_minutes_of_day(now: DateTime<Utc>, offset: FixedOffset) -> i64 {
    let utc_minutes = i64::from(now.time().hour()) * 60 + i64::from(now.time().minute());
    let offset_minutes = i64::from(offset.local_minus_utc()) / 60;
    (utc_minutes + offset_minutes).rem_euclid(MINUTES_PER_DAY)
}

/// Minute distance between two times of day, corrected for day wraparound:
/// 23:58 and 00:02 are 4 minutes apart, not 1436.
pub fn wrapped_minute_distance(a: i64, b: i64) -> i64 {
    let diff = (a - b).abs();
    if diff > MINUTES_PER_DAY / 2 {
        MINUTES_PER_DAY - diff
    } else {
        diff
    }
}

/// Is the scheduled clock time within `tolerance_minutes` of `now` in the
/// reference timezone? Which calendar day the match belongs to is the
/// caller's concern (see [`super::occurrence::resolve_occurrence`]).
pub fn is_due(
    clock: ClockTime,
    now: DateTime<Utc>,
    offset: FixedOffset,
    tolerance_minutes: i64,
) -> bool {
    let distance = wrapped_minute_distance(
        clock.minutes_from_midnight(),
        local_minutes_of_day(now, offset),
    );
    distance <= tolerance_minutes
}
