//! The dispatch cycle: externally triggered, runs to completion, and is
//! idempotent — invoking it twice in the same window never notifies twice.
//!
//! Two passes per cycle:
//! 1. Window pass — for each medication with an enabled channel, each
//!    scheduled clock time within tolerance of `now` is claimed via the
//!    atomic insert-if-absent on its deterministic occurrence id, then
//!    fanned out. The claim happens before any channel I/O, and that
//!    insert is the sole guard overlapping cycles need.
//! 2. Snooze pass — delayed records whose deadline has passed are moved
//!    back to pending and re-delivered with their *original* schedule
//!    time. Snooze deadlines are independent of the clock-time window.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::repository::dose_log::{self, ClaimOutcome};
use crate::db::repository::medication;
use crate::db::repository::profile::{self, UserChannels};
use crate::db::DatabaseError;
use crate::notify::{ChannelKind, DoseReminder, Notifier, SendError};
use crate::schedule::occurrence;
use crate::schedule::window::{self, ClockTime};

use super::{DispatchConfig, ReminderError};

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Occurrences that triggered a dispatch action (new claims plus
    /// resurrected snoozes).
    pub processed: usize,
    /// Individual channel deliveries that succeeded.
    pub notifications_sent: usize,
    /// Individual channel deliveries that failed.
    pub delivery_failures: usize,
}

impl CycleReport {
    fn absorb(&mut self, outcome: (usize, usize)) {
        self.notifications_sent += outcome.0;
        self.delivery_failures += outcome.1;
    }
}

/// Run one dispatch cycle at `now`.
///
/// A failure of either top-level fetch fails the whole cycle; a store
/// error on a single occurrence skips only that occurrence.
pub fn run_cycle(
    conn: &Connection,
    notifier: &Notifier,
    config: &DispatchConfig,
    now: DateTime<Utc>,
) -> Result<CycleReport, ReminderError> {
    let mut report = CycleReport::default();

    claim_due_occurrences(conn, notifier, config, now, &mut report)?;
    resurrect_elapsed_snoozes(conn, notifier, config, now, &mut report)?;

    tracing::info!(
        processed = report.processed,
        sent = report.notifications_sent,
        failed = report.delivery_failures,
        "Reminder cycle complete"
    );
    Ok(report)
}

/// Window pass: claim and notify occurrences whose clock time is due now.
fn claim_due_occurrences(
    conn: &Connection,
    notifier: &Notifier,
    config: &DispatchConfig,
    now: DateTime<Utc>,
    report: &mut CycleReport,
) -> Result<(), ReminderError> {
    let targets = medication::fetch_dispatch_targets(conn)?;
    let today = now.with_timezone(&config.offset).date_naive();

    for target in &targets {
        if !target.medication.active_on(today) {
            continue;
        }

        for raw_time in &target.medication.times {
            let clock = match ClockTime::parse(raw_time) {
                Ok(clock) => clock,
                Err(e) => {
                    tracing::warn!(
                        medication_id = %target.medication.id,
                        time = %raw_time,
                        "Skipping unparseable schedule time: {e}"
                    );
                    continue;
                }
            };

            if !window::is_due(clock, now, config.offset, config.tolerance_minutes) {
                continue;
            }

            let resolved = occurrence::resolve_occurrence(now, clock, config.offset);
            let occurrence_id =
                occurrence::occurrence_id(&target.medication.id, resolved.date, clock);

            let claimed = match claim(conn, target, &occurrence_id, resolved.scheduled_at) {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(
                        occurrence_id = %occurrence_id,
                        "Dose record store error, skipping occurrence: {e}"
                    );
                    continue;
                }
            };
            let Some(scheduled_at) = claimed else {
                continue;
            };

            report.processed += 1;

            let reminder = DoseReminder {
                occurrence_id: occurrence_id.clone(),
                medication_id: target.medication.id.clone(),
                medication_name: target.medication.name.clone(),
                dosage: target.medication.dosage.clone(),
                time_label: time_label(scheduled_at, config),
                snooze_minutes: config.snooze_minutes,
            };

            report.absorb(deliver(
                conn,
                notifier,
                &target.medication.user_id,
                &target.channels,
                &reminder,
            ));
        }
    }

    Ok(())
}

/// Snooze pass: delayed records whose deadline passed become pending again
/// and are re-delivered, announcing the original scheduled time.
fn resurrect_elapsed_snoozes(
    conn: &Connection,
    notifier: &Notifier,
    config: &DispatchConfig,
    now: DateTime<Utc>,
    report: &mut CycleReport,
) -> Result<(), ReminderError> {
    for due in dose_log::fetch_due_delayed(conn, now)? {
        match dose_log::resurrect(conn, &due.log.id) {
            Ok(true) => {}
            // Status changed between fetch and update (e.g. the user just
            // responded) — leave it alone.
            Ok(false) => continue,
            Err(e) => {
                tracing::error!(
                    occurrence_id = %due.log.id,
                    "Dose record store error, skipping resurrection: {e}"
                );
                continue;
            }
        }

        report.processed += 1;

        let reminder = DoseReminder {
            occurrence_id: due.log.id.clone(),
            medication_id: due.log.medication_id.clone(),
            medication_name: due.medication_name.clone(),
            dosage: due.dosage.clone(),
            time_label: time_label(due.log.scheduled_time, config),
            snooze_minutes: config.snooze_minutes,
        };

        report.absorb(deliver(
            conn,
            notifier,
            &due.log.user_id,
            &due.channels,
            &reminder,
        ));
    }

    Ok(())
}

/// Claim an occurrence if no record exists yet. Existing records — whatever
/// their status — are already handled; delayed ones are the snooze pass's
/// job.
fn claim(
    conn: &Connection,
    target: &medication::DispatchTarget,
    occurrence_id: &str,
    scheduled_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    match dose_log::claim_occurrence(
        conn,
        occurrence_id,
        &target.medication.user_id,
        &target.medication.id,
        scheduled_at,
    )? {
        ClaimOutcome::Claimed(log) => Ok(Some(log.scheduled_time)),
        ClaimOutcome::Existing(_) => Ok(None),
    }
}

fn time_label(scheduled_at: DateTime<Utc>, config: &DispatchConfig) -> String {
    scheduled_at
        .with_timezone(&config.offset)
        .format("%H:%M")
        .to_string()
}

/// Fan a reminder out to every enabled channel. Failures are independent:
/// one channel failing never stops the others, and nothing is retried
/// within the cycle.
fn deliver(
    conn: &Connection,
    notifier: &Notifier,
    user_id: &str,
    channels: &UserChannels,
    reminder: &DoseReminder,
) -> (usize, usize) {
    let mut sent = 0;
    let mut failed = 0;

    for channel in notifier.channels() {
        let address = match channel.kind() {
            ChannelKind::Telegram => channels.telegram_chat_id.as_deref(),
            ChannelKind::WebPush => channels.push_subscription.as_deref(),
        };
        let Some(address) = address else {
            continue;
        };

        match channel.send_reminder(address, reminder) {
            Ok(()) => {
                tracing::debug!(
                    channel = %channel.kind(),
                    occurrence_id = %reminder.occurrence_id,
                    "Reminder delivered"
                );
                sent += 1;
            }
            Err(SendError::Gone) if channel.kind() == ChannelKind::WebPush => {
                failed += 1;
                tracing::warn!(
                    user_id = %user_id,
                    "Push subscription expired, clearing registration"
                );
                if let Err(e) = profile::clear_push_subscription(conn, user_id) {
                    tracing::error!("Failed to clear expired push subscription: {e}");
                }
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    channel = %channel.kind(),
                    occurrence_id = %reminder.occurrence_id,
                    "Reminder delivery failed: {e}"
                );
            }
        }
    }

    (sent, failed)
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
