//! Missed-dose audit sweep.
//!
//! Runs separately from the live dispatch cycle: any occurrence whose
//! scheduled time elapsed more than the configured grace period ago with
//! no record at all is backfilled as `missed`, silently — no notification.
//! The sweep covers every medication regardless of channels, since a
//! missed dose is a fact about adherence, not about deliverability.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::repository::{dose_log, medication};
use crate::schedule::occurrence;
use crate::schedule::window::ClockTime;

use super::{DispatchConfig, ReminderError};

/// Backfill `missed` records for unhandled elapsed occurrences.
/// Returns how many records were created.
pub fn sweep_missed(
    conn: &Connection,
    config: &DispatchConfig,
    missed_after_minutes: i64,
    now: DateTime<Utc>,
) -> Result<usize, ReminderError> {
    let medications = medication::fetch_all_medications(conn)?;
    let today = now.with_timezone(&config.offset).date_naive();
    // Yesterday is included so late-night doses (which cannot be 30 minutes
    // overdue before midnight) still get swept after the day flips.
    let days = [today.pred_opt().unwrap_or(today), today];
    let mut missed = 0;

    for med in &medications {
        for raw_time in &med.times {
            let clock = match ClockTime::parse(raw_time) {
                Ok(clock) => clock,
                Err(e) => {
                    tracing::warn!(
                        medication_id = %med.id,
                        time = %raw_time,
                        "Skipping unparseable schedule time: {e}"
                    );
                    continue;
                }
            };

            for date in days {
                if !med.active_on(date) {
                    continue;
                }
                let scheduled_at = occurrence::instant_for(date, clock, config.offset);
                // Future or still-in-grace occurrences are not missed yet.
                if now - scheduled_at < Duration::minutes(missed_after_minutes) {
                    continue;
                }

                let occurrence_id = occurrence::occurrence_id(&med.id, date, clock);
                match dose_log::backfill_missed(
                    conn,
                    &occurrence_id,
                    &med.user_id,
                    &med.id,
                    scheduled_at,
                ) {
                    Ok(true) => {
                        tracing::debug!(occurrence_id = %occurrence_id, "Backfilled missed dose");
                        missed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            occurrence_id = %occurrence_id,
                            "Dose record store error, skipping occurrence: {e}"
                        );
                    }
                }
            }
        }
    }

    tracing::info!(missed, "Missed-dose sweep complete");
    Ok(missed)
}
