//! Dose occurrence records and the dose status state machine.
//!
//! A dose log's id is the deterministic occurrence id (medication + calendar
//! day + clock time), so `INSERT OR IGNORE` against the primary key is the
//! claim primitive: whichever invocation inserts the row owns notification
//! for that occurrence. Records are never deleted — they are the adherence
//! audit trail.
//!
//! Supply bookkeeping is a function of the status *transition* into or out
//! of `taken`, never of the raw status value, so replaying a write cannot
//! double-count.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::repository::{format_utc, medication, parse_utc};
use crate::db::DatabaseError;

// ═══════════════════════════════════════════
// Status state machine
// ═══════════════════════════════════════════

/// Lifecycle state of a dose occurrence.
///
/// `pending` is the initial state. Transitions are one-directional except
/// `delayed -> pending`, the snooze resurrection. `unresponsive` is reserved
/// for an external no-interaction policy and never produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseStatus {
    Pending,
    Taken,
    Skipped,
    Missed,
    Delayed,
    Unresponsive,
}

impl DoseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Taken => "taken",
            Self::Skipped => "skipped",
            Self::Missed => "missed",
            Self::Delayed => "delayed",
            Self::Unresponsive => "unresponsive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "taken" => Some(Self::Taken),
            "skipped" => Some(Self::Skipped),
            "missed" => Some(Self::Missed),
            "delayed" => Some(Self::Delayed),
            "unresponsive" => Some(Self::Unresponsive),
            _ => None,
        }
    }
}

impl std::fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supply units to subtract for a status transition: +1 entering `taken`,
/// -1 leaving `taken`, 0 otherwise. `previous = None` means the record is
/// being created.
pub fn supply_delta(previous: Option<DoseStatus>, next: DoseStatus) -> i64 {
    let was_taken = matches!(previous, Some(DoseStatus::Taken));
    let is_taken = matches!(next, DoseStatus::Taken);
    match (was_taken, is_taken) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

// ═══════════════════════════════════════════
// Types
// ═══════════════════════════════════════════

/// One dose occurrence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseLog {
    pub id: String,
    pub user_id: String,
    pub medication_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub actual_time: Option<DateTime<Utc>>,
    pub status: DoseStatus,
    pub notes: Option<String>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub delay_count: i64,
    pub delay_reason: Option<String>,
}

/// Outcome of a claim attempt for an occurrence.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The row was newly inserted — this caller owns notification.
    Claimed(DoseLog),
    /// The row already existed; its current state is returned.
    Existing(DoseLog),
}

/// Full upsert input for the manual dose-log write path.
#[derive(Debug, Clone)]
pub struct DoseLogWrite {
    pub id: String,
    pub user_id: String,
    pub medication_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub actual_time: Option<DateTime<Utc>>,
    pub status: DoseStatus,
    pub notes: Option<String>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub delay_count: Option<i64>,
    pub delay_reason: Option<String>,
}

/// A status transition applied by the action handler.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: DoseStatus,
    pub actual_time: Option<DateTime<Utc>>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub bump_delay_count: bool,
    pub delay_reason: Option<String>,
}

/// Filters for listing dose logs.
#[derive(Debug, Clone, Default)]
pub struct DoseLogFilter {
    pub medication_id: Option<String>,
    pub status: Option<DoseStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct DoseLogRow {
    id: String,
    user_id: String,
    medication_id: String,
    scheduled_time: String,
    actual_time: Option<String>,
    status: String,
    notes: Option<String>,
    delayed_until: Option<String>,
    delay_count: i64,
    delay_reason: Option<String>,
}

const DOSE_LOG_COLUMNS: &str = "id, user_id, medication_id, scheduled_time, actual_time, \
     status, notes, delayed_until, delay_count, delay_reason";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<DoseLogRow> {
    Ok(DoseLogRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        medication_id: row.get(2)?,
        scheduled_time: row.get(3)?,
        actual_time: row.get(4)?,
        status: row.get(5)?,
        notes: row.get(6)?,
        delayed_until: row.get(7)?,
        delay_count: row.get(8)?,
        delay_reason: row.get(9)?,
    })
}

fn row_to_log(row: DoseLogRow) -> Result<DoseLog, DatabaseError> {
    let status = DoseStatus::parse(&row.status).ok_or_else(|| DatabaseError::InvalidValue {
        field: "status".to_string(),
        value: row.status.clone(),
    })?;
    let scheduled_time =
        parse_utc(&row.scheduled_time).ok_or_else(|| DatabaseError::InvalidValue {
            field: "scheduled_time".to_string(),
            value: row.scheduled_time.clone(),
        })?;
    Ok(DoseLog {
        id: row.id,
        user_id: row.user_id,
        medication_id: row.medication_id,
        scheduled_time,
        actual_time: row.actual_time.as_deref().and_then(parse_utc),
        status,
        notes: row.notes,
        delayed_until: row.delayed_until.as_deref().and_then(parse_utc),
        delay_count: row.delay_count,
        delay_reason: row.delay_reason,
    })
}

// ═══════════════════════════════════════════
// Repository functions
// ═══════════════════════════════════════════

/// Fetch a dose log by occurrence id.
pub fn fetch_dose_log(conn: &Connection, id: &str) -> Result<Option<DoseLog>, DatabaseError> {
    let sql = format!("SELECT {DOSE_LOG_COLUMNS} FROM dose_logs WHERE id = ?1");
    let row = conn.query_row(&sql, params![id], row_from_sql).optional()?;
    row.map(row_to_log).transpose()
}

/// Claim an occurrence: insert a `pending` record if none exists.
///
/// The `INSERT OR IGNORE` against the primary key is atomic, so overlapping
/// dispatch cycles cannot both claim the same occurrence.
pub fn claim_occurrence(
    conn: &Connection,
    id: &str,
    user_id: &str,
    medication_id: &str,
    scheduled_time: DateTime<Utc>,
) -> Result<ClaimOutcome, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dose_logs (id, user_id, medication_id, scheduled_time, status)
         VALUES (?1, ?2, ?3, ?4, 'pending')",
        params![id, user_id, medication_id, format_utc(scheduled_time)],
    )?;

    let log = fetch_dose_log(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "dose log".to_string(),
        id: id.to_string(),
    })?;

    if inserted > 0 {
        Ok(ClaimOutcome::Claimed(log))
    } else {
        Ok(ClaimOutcome::Existing(log))
    }
}

/// Move a delayed record back to `pending` so it is treated as due again.
///
/// `delayed_until` is deliberately kept for the audit trail. Returns whether
/// the record was actually resurrected (false if its status changed since).
pub fn resurrect(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE dose_logs SET status = 'pending', updated_at = datetime('now')
         WHERE id = ?1 AND status = 'delayed'",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Backfill a `missed` record for an occurrence that elapsed with no record
/// at all. Returns whether a record was created.
pub fn backfill_missed(
    conn: &Connection,
    id: &str,
    user_id: &str,
    medication_id: &str,
    scheduled_time: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dose_logs (id, user_id, medication_id, scheduled_time, status, notes)
         VALUES (?1, ?2, ?3, ?4, 'missed', 'Logged automatically after the dose window elapsed')",
        params![id, user_id, medication_id, format_utc(scheduled_time)],
    )?;
    Ok(inserted > 0)
}

/// A delayed record whose snooze deadline has passed, joined with what the
/// dispatcher needs to re-deliver it.
#[derive(Debug, Clone)]
pub struct DueDelayed {
    pub log: DoseLog,
    pub medication_name: String,
    pub dosage: String,
    pub channels: crate::db::repository::profile::UserChannels,
}

/// Fetch delayed records whose deadline is at or before `now`, for users
/// with at least one enabled channel. The snooze deadline is independent of
/// the dose's original clock-time window — a 15-minute snooze on an 08:00
/// dose resurrects at 08:18ff even though the due window closed at 08:05.
pub fn fetch_due_delayed(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<DueDelayed>, DatabaseError> {
    let sql = "SELECT d.id, d.user_id, d.medication_id, d.scheduled_time, d.actual_time,
                d.status, d.notes, d.delayed_until, d.delay_count, d.delay_reason,
                m.name, m.dosage,
                CASE WHEN p.telegram_enabled = 1 THEN p.telegram_chat_id END,
                CASE WHEN p.push_enabled = 1 THEN p.push_subscription END
         FROM dose_logs d
         JOIN medications m ON m.id = d.medication_id
         JOIN profiles p ON p.id = d.user_id
         WHERE d.status = 'delayed'
           AND d.delayed_until IS NOT NULL
           AND d.delayed_until <= ?1
           AND ((p.telegram_enabled = 1 AND p.telegram_chat_id IS NOT NULL)
             OR (p.push_enabled = 1 AND p.push_subscription IS NOT NULL))
         ORDER BY d.delayed_until ASC";

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![format_utc(now)], |row| {
            let log = row_from_sql(row)?;
            let medication_name: String = row.get(10)?;
            let dosage: String = row.get(11)?;
            let channels = crate::db::repository::profile::UserChannels {
                telegram_chat_id: row.get(12)?,
                push_subscription: row.get(13)?,
            };
            Ok((log, medication_name, dosage, channels))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(row, medication_name, dosage, channels)| {
            Ok(DueDelayed {
                log: row_to_log(row)?,
                medication_name,
                dosage,
                channels,
            })
        })
        .collect()
}

/// Apply a status transition with the supply rule, all-or-nothing.
///
/// The previous status is re-read inside the transaction and the UPDATE is
/// conditional on it; if another writer got in between, the change is
/// rejected with a conflict instead of double-adjusting the supply.
pub fn apply_status_change(
    conn: &mut Connection,
    id: &str,
    change: &StatusChange,
) -> Result<DoseLog, DatabaseError> {
    let tx = conn.transaction()?;

    let previous = fetch_dose_log(&tx, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "dose log".to_string(),
        id: id.to_string(),
    })?;

    let updated = tx.execute(
        "UPDATE dose_logs SET
            status = ?2,
            actual_time = COALESCE(?3, actual_time),
            delayed_until = COALESCE(?4, delayed_until),
            delay_count = delay_count + ?5,
            delay_reason = COALESCE(?6, delay_reason),
            updated_at = datetime('now')
         WHERE id = ?1 AND status = ?7",
        params![
            id,
            change.status.as_str(),
            change.actual_time.map(format_utc),
            change.delayed_until.map(format_utc),
            i64::from(change.bump_delay_count),
            change.delay_reason,
            previous.status.as_str(),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::Conflict(format!(
            "dose log {id} was modified concurrently"
        )));
    }

    let delta = supply_delta(Some(previous.status), change.status);
    if delta != 0 {
        medication::adjust_supply(&tx, &previous.medication_id, delta)?;
    }

    let log = fetch_dose_log(&tx, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "dose log".to_string(),
        id: id.to_string(),
    })?;
    tx.commit()?;
    Ok(log)
}

/// Upsert a dose record by occurrence id (the manual-log path), applying
/// the supply rule against whatever the previous persisted status was.
pub fn upsert_dose_log(
    conn: &mut Connection,
    write: &DoseLogWrite,
) -> Result<DoseLog, DatabaseError> {
    let tx = conn.transaction()?;

    let previous = fetch_dose_log(&tx, &write.id)?;
    match &previous {
        None => {
            tx.execute(
                "INSERT INTO dose_logs (id, user_id, medication_id, scheduled_time,
                    actual_time, status, notes, delayed_until, delay_count, delay_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    write.id,
                    write.user_id,
                    write.medication_id,
                    format_utc(write.scheduled_time),
                    write.actual_time.map(format_utc),
                    write.status.as_str(),
                    write.notes,
                    write.delayed_until.map(format_utc),
                    write.delay_count.unwrap_or(0),
                    write.delay_reason,
                ],
            )?;
        }
        Some(_) => {
            tx.execute(
                "UPDATE dose_logs SET
                    scheduled_time = ?2,
                    status = ?3,
                    actual_time = COALESCE(?4, actual_time),
                    notes = COALESCE(?5, notes),
                    delayed_until = COALESCE(?6, delayed_until),
                    delay_count = COALESCE(?7, delay_count),
                    delay_reason = COALESCE(?8, delay_reason),
                    updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    write.id,
                    format_utc(write.scheduled_time),
                    write.status.as_str(),
                    write.actual_time.map(format_utc),
                    write.notes,
                    write.delayed_until.map(format_utc),
                    write.delay_count,
                    write.delay_reason,
                ],
            )?;
        }
    }

    let delta = supply_delta(previous.as_ref().map(|p| p.status), write.status);
    if delta != 0 {
        medication::adjust_supply(&tx, &write.medication_id, delta)?;
    }

    let log = fetch_dose_log(&tx, &write.id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "dose log".to_string(),
        id: write.id.clone(),
    })?;
    tx.commit()?;
    Ok(log)
}

/// List a user's dose logs with optional filters, newest first.
pub fn list_dose_logs(
    conn: &Connection,
    user_id: &str,
    filter: &DoseLogFilter,
) -> Result<Vec<DoseLog>, DatabaseError> {
    let mut sql = format!(
        "SELECT {DOSE_LOG_COLUMNS} FROM dose_logs WHERE user_id = ?1"
    );
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(user_id.to_string())];
    let mut param_idx = 2;

    if let Some(medication_id) = &filter.medication_id {
        sql.push_str(&format!(" AND medication_id = ?{param_idx}"));
        params_vec.push(Box::new(medication_id.clone()));
        param_idx += 1;
    }
    if let Some(status) = filter.status {
        sql.push_str(&format!(" AND status = ?{param_idx}"));
        params_vec.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(from) = filter.from {
        sql.push_str(&format!(" AND scheduled_time >= ?{param_idx}"));
        params_vec.push(Box::new(format_utc(from)));
        param_idx += 1;
    }
    if let Some(to) = filter.to {
        sql.push_str(&format!(" AND scheduled_time <= ?{param_idx}"));
        params_vec.push(Box::new(format_utc(to)));
        // param_idx incremented but not used after this
    }

    sql.push_str(" ORDER BY scheduled_time DESC");

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_refs.as_slice(), row_from_sql)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(row_to_log).collect()
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::medication::MedicationInput;
    use crate::db::repository::profile;
    use crate::db::sqlite::open_memory_database;
    use chrono::{NaiveDate, TimeZone};

    fn setup() -> (Connection, String) {
        let conn = open_memory_database().unwrap();
        profile::insert_profile(&conn, "u1", "Test User").unwrap();
        let med = medication::insert_medication(
            &conn,
            "u1",
            &MedicationInput {
                name: "Metformin".to_string(),
                dosage: "500mg".to_string(),
                med_type: "tablet".to_string(),
                times: vec!["08:00".to_string(), "20:00".to_string()],
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: None,
                notes: None,
                current_supply: Some(10),
                supply_unit: Some("pills".to_string()),
                low_stock_threshold: None,
            },
        )
        .unwrap();
        (conn, med.id)
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn supply(conn: &Connection, med_id: &str) -> i64 {
        medication::fetch_medication(conn, med_id)
            .unwrap()
            .unwrap()
            .current_supply
            .unwrap()
    }

    #[test]
    fn claim_inserts_once() {
        let (conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");

        let first = claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();
        match second {
            ClaimOutcome::Existing(log) => {
                assert_eq!(log.status, DoseStatus::Pending);
                assert_eq!(log.scheduled_time, t(8, 0));
            }
            ClaimOutcome::Claimed(_) => panic!("second claim must not insert"),
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM dose_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn supply_delta_only_crosses_taken_boundary() {
        use DoseStatus::*;
        assert_eq!(supply_delta(None, Taken), 1);
        assert_eq!(supply_delta(Some(Pending), Taken), 1);
        assert_eq!(supply_delta(Some(Delayed), Taken), 1);
        assert_eq!(supply_delta(Some(Taken), Skipped), -1);
        assert_eq!(supply_delta(Some(Taken), Pending), -1);
        assert_eq!(supply_delta(Some(Taken), Taken), 0);
        assert_eq!(supply_delta(Some(Pending), Delayed), 0);
        assert_eq!(supply_delta(Some(Delayed), Pending), 0);
        assert_eq!(supply_delta(None, Missed), 0);
    }

    #[test]
    fn status_change_take_decrements_supply() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();

        let log = apply_status_change(
            &mut conn,
            &id,
            &StatusChange {
                status: DoseStatus::Taken,
                actual_time: Some(t(8, 2)),
                delayed_until: None,
                bump_delay_count: false,
                delay_reason: None,
            },
        )
        .unwrap();
        assert_eq!(log.status, DoseStatus::Taken);
        assert_eq!(log.actual_time, Some(t(8, 2)));
        assert_eq!(supply(&conn, &med_id), 9);
    }

    #[test]
    fn correcting_taken_restores_supply() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();

        apply_status_change(
            &mut conn,
            &id,
            &StatusChange {
                status: DoseStatus::Taken,
                actual_time: Some(t(8, 2)),
                delayed_until: None,
                bump_delay_count: false,
                delay_reason: None,
            },
        )
        .unwrap();
        assert_eq!(supply(&conn, &med_id), 9);

        // User error correction: taken -> skipped puts the unit back
        apply_status_change(
            &mut conn,
            &id,
            &StatusChange {
                status: DoseStatus::Skipped,
                actual_time: Some(t(8, 5)),
                delayed_until: None,
                bump_delay_count: false,
                delay_reason: None,
            },
        )
        .unwrap();
        assert_eq!(supply(&conn, &med_id), 10);
    }

    #[test]
    fn delay_cycle_never_touches_supply() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();

        apply_status_change(
            &mut conn,
            &id,
            &StatusChange {
                status: DoseStatus::Delayed,
                actual_time: None,
                delayed_until: Some(t(8, 18)),
                bump_delay_count: true,
                delay_reason: Some("at work".to_string()),
            },
        )
        .unwrap();
        assert!(resurrect(&conn, &id).unwrap());

        let log = fetch_dose_log(&conn, &id).unwrap().unwrap();
        assert_eq!(log.status, DoseStatus::Pending);
        assert_eq!(log.delay_count, 1);
        // delayed_until kept for the audit trail
        assert_eq!(log.delayed_until, Some(t(8, 18)));
        assert_eq!(supply(&conn, &med_id), 10);
    }

    #[test]
    fn resurrect_requires_delayed_status() {
        let (conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();

        assert!(!resurrect(&conn, &id).unwrap(), "pending must not resurrect");
    }

    #[test]
    fn status_change_missing_record_not_found() {
        let (mut conn, _) = setup();
        let err = apply_status_change(
            &mut conn,
            "nope",
            &StatusChange {
                status: DoseStatus::Taken,
                actual_time: None,
                delayed_until: None,
                bump_delay_count: false,
                delay_reason: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn upsert_creates_then_merges() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");

        // Manual log before the reminder fired: straight to taken
        let log = upsert_dose_log(
            &mut conn,
            &DoseLogWrite {
                id: id.clone(),
                user_id: "u1".to_string(),
                medication_id: med_id.clone(),
                scheduled_time: t(8, 0),
                actual_time: Some(t(7, 58)),
                status: DoseStatus::Taken,
                notes: None,
                delayed_until: None,
                delay_count: None,
                delay_reason: None,
            },
        )
        .unwrap();
        assert_eq!(log.status, DoseStatus::Taken);
        assert_eq!(supply(&conn, &med_id), 9);

        // Re-writing the same status is a no-op for supply
        upsert_dose_log(
            &mut conn,
            &DoseLogWrite {
                id: id.clone(),
                user_id: "u1".to_string(),
                medication_id: med_id.clone(),
                scheduled_time: t(8, 0),
                actual_time: None,
                status: DoseStatus::Taken,
                notes: Some("double tap".to_string()),
                delayed_until: None,
                delay_count: None,
                delay_reason: None,
            },
        )
        .unwrap();
        assert_eq!(supply(&conn, &med_id), 9);

        let log = fetch_dose_log(&conn, &id).unwrap().unwrap();
        // actual_time survives a write that omits it
        assert_eq!(log.actual_time, Some(t(7, 58)));
        assert_eq!(log.notes.as_deref(), Some("double tap"));
    }

    #[test]
    fn inventory_replay_invariant() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();

        let sequence = [
            DoseStatus::Delayed,
            DoseStatus::Pending,
            DoseStatus::Taken,
            DoseStatus::Skipped,
            DoseStatus::Taken,
        ];
        let mut entries_into_taken = 0i64;
        let mut exits_from_taken = 0i64;
        let mut prev = DoseStatus::Pending;
        for status in sequence {
            upsert_dose_log(
                &mut conn,
                &DoseLogWrite {
                    id: id.clone(),
                    user_id: "u1".to_string(),
                    medication_id: med_id.clone(),
                    scheduled_time: t(8, 0),
                    actual_time: None,
                    status,
                    notes: None,
                    delayed_until: None,
                    delay_count: None,
                    delay_reason: None,
                },
            )
            .unwrap();
            if status == DoseStatus::Taken && prev != DoseStatus::Taken {
                entries_into_taken += 1;
            }
            if prev == DoseStatus::Taken && status != DoseStatus::Taken {
                exits_from_taken += 1;
            }
            prev = status;
        }

        assert_eq!(entries_into_taken, 2);
        assert_eq!(exits_from_taken, 1);
        assert_eq!(supply(&conn, &med_id), 10 - entries_into_taken + exits_from_taken);
    }

    #[test]
    fn list_filters_by_status_and_range() {
        let (mut conn, med_id) = setup();
        for (hour, status) in [(8, DoseStatus::Taken), (12, DoseStatus::Skipped), (20, DoseStatus::Pending)] {
            upsert_dose_log(
                &mut conn,
                &DoseLogWrite {
                    id: format!("{med_id}_2024-01-01_{hour:02}00"),
                    user_id: "u1".to_string(),
                    medication_id: med_id.clone(),
                    scheduled_time: t(hour, 0),
                    actual_time: None,
                    status,
                    notes: None,
                    delayed_until: None,
                    delay_count: None,
                    delay_reason: None,
                },
            )
            .unwrap();
        }

        let all = list_dose_logs(&conn, "u1", &DoseLogFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert_eq!(all[0].scheduled_time, t(20, 0));

        let taken = list_dose_logs(
            &conn,
            "u1",
            &DoseLogFilter {
                status: Some(DoseStatus::Taken),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(taken.len(), 1);

        let midday = list_dose_logs(
            &conn,
            "u1",
            &DoseLogFilter {
                from: Some(t(10, 0)),
                to: Some(t(15, 0)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(midday.len(), 1);
        assert_eq!(midday[0].status, DoseStatus::Skipped);

        let other_user = list_dose_logs(&conn, "u2", &DoseLogFilter::default()).unwrap();
        assert!(other_user.is_empty());
    }

    #[test]
    fn due_delayed_requires_enabled_channel_and_elapsed_deadline() {
        let (mut conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");
        claim_occurrence(&conn, &id, "u1", &med_id, t(8, 0)).unwrap();
        apply_status_change(
            &mut conn,
            &id,
            &StatusChange {
                status: DoseStatus::Delayed,
                actual_time: None,
                delayed_until: Some(t(8, 18)),
                bump_delay_count: true,
                delay_reason: None,
            },
        )
        .unwrap();

        // No channel enabled: not eligible even past the deadline.
        assert!(fetch_due_delayed(&conn, t(8, 30)).unwrap().is_empty());

        profile::connect_telegram(&conn, "u1", "chat-1").unwrap();

        // Deadline still in the future.
        assert!(fetch_due_delayed(&conn, t(8, 10)).unwrap().is_empty());

        let due = fetch_due_delayed(&conn, t(8, 30)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].log.id, id);
        assert_eq!(due[0].medication_name, "Metformin");
        assert_eq!(due[0].dosage, "500mg");
        assert_eq!(due[0].channels.telegram_chat_id.as_deref(), Some("chat-1"));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            DoseStatus::Pending,
            DoseStatus::Taken,
            DoseStatus::Skipped,
            DoseStatus::Missed,
            DoseStatus::Delayed,
            DoseStatus::Unresponsive,
        ] {
            assert_eq!(DoseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DoseStatus::parse("bogus"), None);
    }

    #[test]
    fn backfill_missed_is_idempotent() {
        let (conn, med_id) = setup();
        let id = format!("{med_id}_2024-01-01_0800");

        assert!(backfill_missed(&conn, &id, "u1", &med_id, t(8, 0)).unwrap());
        assert!(!backfill_missed(&conn, &id, "u1", &med_id, t(8, 0)).unwrap());

        let log = fetch_dose_log(&conn, &id).unwrap().unwrap();
        assert_eq!(log.status, DoseStatus::Missed);
        assert!(log.notes.is_some());
    }
}
