//! Dose occurrence identity: the deterministic id for one (medication,
//! calendar day, clock time) triple, and the calendar-day resolution both
//! the dispatcher and the manual-log path must share.
//!
//! The calendar day is always the reference-timezone local day. Every call
//! site derives it through [`resolve_occurrence`] — two different
//! resolution strategies would mint two ids for the same dose.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use super::window::ClockTime;

/// Deterministic occurrence id: `{medication_id}_{YYYY-MM-DD}_{HHMM}`.
/// The clock time is colon-free so the id stays unambiguous with `_` as
/// the only separator. Pure; used both to look up and to create records.
pub fn occurrence_id(medication_id: &str, date: NaiveDate, clock: ClockTime) -> String {
    format!(
        "{}_{}_{}",
        medication_id,
        date.format("%Y-%m-%d"),
        clock.compact()
    )
}

/// An occurrence pinned to a calendar day and an absolute instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOccurrence {
    /// Calendar day in the reference timezone.
    pub date: NaiveDate,
    /// The absolute instant of `date` + clock time in the reference offset.
    pub scheduled_at: DateTime<Utc>,
}

/// The absolute instant of `date` + `clock` in the reference offset.
pub fn instant_for(date: NaiveDate, clock: ClockTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(clock.to_naive_time());
    let utc_naive = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc_naive)
}

/// Pin a clock time to the calendar day whose implied absolute instant is
/// closest to `now`: start from today in the reference timezone and shift
/// ±1 day when the candidate lands more than 12 hours away. Keeps a 23:58
/// dose checked at 00:02 on yesterday's date rather than minting a second
/// id for the new day.
pub fn resolve_occurrence(
    now: DateTime<Utc>,
    clock: ClockTime,
    offset: FixedOffset,
) -> ResolvedOccurrence {
    let mut date = now.with_timezone(&offset).date_naive();
    let mut scheduled_at = instant_for(date, clock, offset);

    if scheduled_at - now > Duration::hours(12) {
        date = date.pred_opt().unwrap_or(date);
        scheduled_at = instant_for(date, clock, offset);
    } else if now - scheduled_at > Duration::hours(12) {
        date = date.succ_opt().unwrap_or(date);
        scheduled_at = instant_for(date, clock, offset);
    }

    ResolvedOccurrence { date, scheduled_at }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock(s: &str) -> ClockTime {
        ClockTime::parse(s).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn id_strips_colon_from_clock_time() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            occurrence_id("med-1", date, clock("08:00")),
            "med-1_2024-01-01_0800"
        );
        assert_eq!(
            occurrence_id("med-1", date, clock("23:58")),
            "med-1_2024-01-01_2358"
        );
    }

    #[test]
    fn same_inputs_same_id() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            occurrence_id("med-1", date, clock("08:00")),
            occurrence_id("med-1", date, clock("08:00"))
        );
    }

    #[test]
    fn resolves_to_today_for_nearby_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 2, 0).unwrap();
        let resolved = resolve_occurrence(now, clock("08:00"), utc());
        assert_eq!(resolved.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(
            resolved.scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn late_dose_checked_after_midnight_belongs_to_yesterday() {
        // 00:02 on Jan 2, checking the 23:58 dose: that occurrence is Jan 1.
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 2, 0).unwrap();
        let resolved = resolve_occurrence(now, clock("23:58"), utc());
        assert_eq!(resolved.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(
            resolved.scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 23, 58, 0).unwrap()
        );
    }

    #[test]
    fn early_dose_checked_before_midnight_belongs_to_tomorrow() {
        // 23:57, checking the 00:01 dose: that occurrence is the next day.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 57, 0).unwrap();
        let resolved = resolve_occurrence(now, clock("00:01"), utc());
        assert_eq!(resolved.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(
            resolved.scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 1, 0).unwrap()
        );
    }

    #[test]
    fn resolution_uses_reference_timezone_day() {
        // 19:00 UTC on Jan 1 is 00:30 on Jan 2 in +05:30. The 00:15 dose
        // belongs to Jan 2 local, even though UTC still says Jan 1.
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap();
        let resolved = resolve_occurrence(now, clock("00:15"), ist);
        assert_eq!(resolved.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        // 00:15 IST on Jan 2 = 18:45 UTC on Jan 1
        assert_eq!(
            resolved.scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 18, 45, 0).unwrap()
        );
    }

    #[test]
    fn dispatcher_and_manual_path_agree_across_midnight() {
        // The fragility this resolver removes: both sides of midnight must
        // derive the same id for the same dose.
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 23, 56, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 2, 0, 2, 0).unwrap();
        let c = clock("23:58");

        let id_before = occurrence_id("med-1", resolve_occurrence(before, c, utc()).date, c);
        let id_after = occurrence_id("med-1", resolve_occurrence(after, c, utc()).date, c);
        assert_eq!(id_before, id_after);
    }
}
