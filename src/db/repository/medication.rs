//! Medication records — CRUD plus the supply counter the dose lifecycle
//! adjusts when a dose is confirmed taken (or a taken entry is corrected).

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::db::repository::profile::UserChannels;
use crate::schedule::window::ClockTime;

// ═══════════════════════════════════════════
// Types
// ═══════════════════════════════════════════

/// A medication with its daily clock-time schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub dosage: String,
    #[serde(rename = "type")]
    pub med_type: String,
    /// Daily schedule as "HH:MM" strings, validated on write.
    pub times: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// `None` = supply tracking disabled for this medication.
    pub current_supply: Option<i64>,
    pub supply_unit: Option<String>,
    pub low_stock_threshold: Option<i64>,
}

impl Medication {
    /// Is this medication scheduled on the given (reference-timezone) day?
    pub fn active_on(&self, date: NaiveDate) -> bool {
        if date < self.start_date {
            return false;
        }
        match self.end_date {
            Some(end) => date <= end,
            None => true,
        }
    }

    /// Is the remaining supply at or below the low-stock threshold?
    pub fn is_low_on_supply(&self) -> bool {
        match (self.current_supply, self.low_stock_threshold) {
            (Some(supply), Some(threshold)) => supply <= threshold,
            _ => false,
        }
    }
}

/// Input for creating a medication.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationInput {
    pub name: String,
    pub dosage: String,
    #[serde(rename = "type", default = "default_med_type")]
    pub med_type: String,
    pub times: Vec<String>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub current_supply: Option<i64>,
    #[serde(default)]
    pub supply_unit: Option<String>,
    #[serde(default)]
    pub low_stock_threshold: Option<i64>,
}

fn default_med_type() -> String {
    "tablet".to_string()
}

/// Partial update for a medication; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationUpdate {
    pub name: Option<String>,
    pub dosage: Option<String>,
    #[serde(rename = "type")]
    pub med_type: Option<String>,
    pub times: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub current_supply: Option<i64>,
    pub supply_unit: Option<String>,
    pub low_stock_threshold: Option<i64>,
}

/// A medication joined with its owner's enabled notification channels.
/// Only medications with at least one enabled channel are dispatch targets.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub medication: Medication,
    pub channels: UserChannels,
}

// ═══════════════════════════════════════════
// Repository functions
// ═══════════════════════════════════════════

const MEDICATION_COLUMNS: &str = "id, user_id, name, dosage, med_type, times, start_date, \
     end_date, notes, current_supply, supply_unit, low_stock_threshold";

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    let times_json: String = row.get(5)?;
    Ok(Medication {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        dosage: row.get(3)?,
        med_type: row.get(4)?,
        times: serde_json::from_str(&times_json).unwrap_or_default(),
        start_date: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .unwrap_or_default(),
        end_date: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        notes: row.get(8)?,
        current_supply: row.get(9)?,
        supply_unit: row.get(10)?,
        low_stock_threshold: row.get(11)?,
    })
}

fn validate_times(times: &[String]) -> Result<(), DatabaseError> {
    for time in times {
        ClockTime::parse(time).map_err(|_| DatabaseError::InvalidValue {
            field: "times".to_string(),
            value: time.clone(),
        })?;
    }
    Ok(())
}

/// Insert a new medication for a user and return the stored record.
pub fn insert_medication(
    conn: &Connection,
    user_id: &str,
    input: &MedicationInput,
) -> Result<Medication, DatabaseError> {
    validate_times(&input.times)?;

    let id = Uuid::new_v4().to_string();
    let times_json = serde_json::to_string(&input.times).map_err(|e| {
        DatabaseError::InvalidValue {
            field: "times".to_string(),
            value: e.to_string(),
        }
    })?;

    conn.execute(
        "INSERT INTO medications (id, user_id, name, dosage, med_type, times,
            start_date, end_date, notes, current_supply, supply_unit, low_stock_threshold)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            user_id,
            input.name,
            input.dosage,
            input.med_type,
            times_json,
            input.start_date.format("%Y-%m-%d").to_string(),
            input.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
            input.notes,
            input.current_supply,
            input.supply_unit,
            input.low_stock_threshold,
        ],
    )?;

    fetch_medication(conn, &id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "medication".to_string(),
        id,
    })
}

/// Fetch a single medication by id.
pub fn fetch_medication(
    conn: &Connection,
    id: &str,
) -> Result<Option<Medication>, DatabaseError> {
    let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], medication_from_row)
        .optional()?;
    Ok(result)
}

/// Fetch all medications owned by a user, newest first.
pub fn fetch_medications(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<Medication>, DatabaseError> {
    let sql = format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE user_id = ?1
         ORDER BY created_at DESC, name ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id], medication_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch every medication regardless of owner (audit sweep input).
pub fn fetch_all_medications(conn: &Connection) -> Result<Vec<Medication>, DatabaseError> {
    let sql = format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications ORDER BY user_id ASC, name ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], medication_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch medications joined with their owner's enabled channel addresses.
///
/// Only returns medications whose owner has at least one enabled channel —
/// doses without a delivery route are never claimed by the dispatcher, so a
/// user who enables notifications later still gets a fresh occurrence.
pub fn fetch_dispatch_targets(conn: &Connection) -> Result<Vec<DispatchTarget>, DatabaseError> {
    let sql = "SELECT m.id, m.user_id, m.name, m.dosage, m.med_type, m.times,
                m.start_date, m.end_date, m.notes, m.current_supply,
                m.supply_unit, m.low_stock_threshold,
                CASE WHEN p.telegram_enabled = 1 THEN p.telegram_chat_id END,
                CASE WHEN p.push_enabled = 1 THEN p.push_subscription END
         FROM medications m
         JOIN profiles p ON p.id = m.user_id
         WHERE (p.telegram_enabled = 1 AND p.telegram_chat_id IS NOT NULL)
            OR (p.push_enabled = 1 AND p.push_subscription IS NOT NULL)
         ORDER BY m.user_id ASC, m.name ASC";

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            let medication = medication_from_row(row)?;
            let channels = UserChannels {
                telegram_chat_id: row.get(12)?,
                push_subscription: row.get(13)?,
            };
            Ok(DispatchTarget {
                medication,
                channels,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Update a medication with the provided fields; absent fields are untouched.
pub fn update_medication(
    conn: &Connection,
    id: &str,
    update: &MedicationUpdate,
) -> Result<Medication, DatabaseError> {
    let mut sets: Vec<String> = vec!["updated_at = datetime('now')".to_string()];
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(id.to_string())];
    let mut param_idx = 2;

    let mut push = |sets: &mut Vec<String>,
                    params_vec: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
                    column: &str,
                    value: Box<dyn rusqlite::types::ToSql>| {
        sets.push(format!("{column} = ?{param_idx}"));
        params_vec.push(value);
        param_idx += 1;
    };

    if let Some(name) = &update.name {
        push(&mut sets, &mut params_vec, "name", Box::new(name.clone()));
    }
    if let Some(dosage) = &update.dosage {
        push(&mut sets, &mut params_vec, "dosage", Box::new(dosage.clone()));
    }
    if let Some(med_type) = &update.med_type {
        push(&mut sets, &mut params_vec, "med_type", Box::new(med_type.clone()));
    }
    if let Some(times) = &update.times {
        validate_times(times)?;
        let json = serde_json::to_string(times).map_err(|e| DatabaseError::InvalidValue {
            field: "times".to_string(),
            value: e.to_string(),
        })?;
        push(&mut sets, &mut params_vec, "times", Box::new(json));
    }
    if let Some(start_date) = update.start_date {
        push(
            &mut sets,
            &mut params_vec,
            "start_date",
            Box::new(start_date.format("%Y-%m-%d").to_string()),
        );
    }
    if let Some(end_date) = update.end_date {
        push(
            &mut sets,
            &mut params_vec,
            "end_date",
            Box::new(end_date.format("%Y-%m-%d").to_string()),
        );
    }
    if let Some(notes) = &update.notes {
        push(&mut sets, &mut params_vec, "notes", Box::new(notes.clone()));
    }
    if let Some(current_supply) = update.current_supply {
        push(
            &mut sets,
            &mut params_vec,
            "current_supply",
            Box::new(current_supply),
        );
    }
    if let Some(supply_unit) = &update.supply_unit {
        push(
            &mut sets,
            &mut params_vec,
            "supply_unit",
            Box::new(supply_unit.clone()),
        );
    }
    if let Some(threshold) = update.low_stock_threshold {
        push(
            &mut sets,
            &mut params_vec,
            "low_stock_threshold",
            Box::new(threshold),
        );
    }

    let sql = format!("UPDATE medications SET {} WHERE id = ?1", sets.join(", "));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_refs.as_slice())?;

    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "medication".to_string(),
            id: id.to_string(),
        });
    }

    fetch_medication(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "medication".to_string(),
        id: id.to_string(),
    })
}

/// Delete a medication (and, via FK cascade, its dose records).
pub fn delete_medication(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute("DELETE FROM medications WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "medication".to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Adjust the remaining supply: `delta = +1` consumes a unit (dose taken),
/// `delta = -1` restores one (a taken entry was corrected).
///
/// No-op returning `None` when the medication has no supply tracking.
/// The counter is floor-clamped at zero, never negative.
pub fn adjust_supply(
    conn: &Connection,
    medication_id: &str,
    delta: i64,
) -> Result<Option<i64>, DatabaseError> {
    let current: Option<Option<i64>> = conn
        .query_row(
            "SELECT current_supply FROM medications WHERE id = ?1",
            params![medication_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(current) = current else {
        return Err(DatabaseError::NotFound {
            entity: "medication".to_string(),
            id: medication_id.to_string(),
        });
    };
    let Some(current) = current else {
        return Ok(None);
    };

    let new_supply = (current - delta).max(0);
    conn.execute(
        "UPDATE medications SET current_supply = ?2, updated_at = datetime('now')
         WHERE id = ?1",
        params![medication_id, new_supply],
    )?;
    Ok(Some(new_supply))
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::profile;
    use crate::db::sqlite::open_memory_database;

    fn test_input(name: &str) -> MedicationInput {
        MedicationInput {
            name: name.to_string(),
            dosage: "500mg".to_string(),
            med_type: "tablet".to_string(),
            times: vec!["08:00".to_string(), "20:00".to_string()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            notes: None,
            current_supply: Some(10),
            supply_unit: Some("pills".to_string()),
            low_stock_threshold: Some(3),
        }
    }

    fn setup() -> Connection {
        let conn = open_memory_database().unwrap();
        profile::insert_profile(&conn, "u1", "Test User").unwrap();
        conn
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let conn = setup();
        let med = insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();
        assert_eq!(med.name, "Metformin");
        assert_eq!(med.times, vec!["08:00", "20:00"]);
        assert_eq!(med.current_supply, Some(10));

        let fetched = fetch_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn insert_rejects_malformed_times() {
        let conn = setup();
        let mut input = test_input("Metformin");
        input.times = vec!["8am".to_string()];
        let err = insert_medication(&conn, "u1", &input).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { .. }));
    }

    #[test]
    fn fetch_medications_scoped_to_user() {
        let conn = setup();
        profile::insert_profile(&conn, "u2", "Other User").unwrap();
        insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();
        insert_medication(&conn, "u2", &test_input("Lisinopril")).unwrap();

        let meds = fetch_medications(&conn, "u1").unwrap();
        assert_eq!(meds.len(), 1);
        assert_eq!(meds[0].name, "Metformin");
    }

    #[test]
    fn update_merges_partial_fields() {
        let conn = setup();
        let med = insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();

        let update = MedicationUpdate {
            dosage: Some("850mg".to_string()),
            times: Some(vec!["09:30".to_string()]),
            ..Default::default()
        };
        let updated = update_medication(&conn, &med.id, &update).unwrap();
        assert_eq!(updated.dosage, "850mg");
        assert_eq!(updated.times, vec!["09:30"]);
        // Untouched fields survive
        assert_eq!(updated.name, "Metformin");
        assert_eq!(updated.current_supply, Some(10));
    }

    #[test]
    fn update_missing_medication_not_found() {
        let conn = setup();
        let err = update_medication(&conn, "nope", &MedicationUpdate::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn delete_removes_medication() {
        let conn = setup();
        let med = insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();
        delete_medication(&conn, &med.id).unwrap();
        assert!(fetch_medication(&conn, &med.id).unwrap().is_none());
        assert!(matches!(
            delete_medication(&conn, &med.id),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn adjust_supply_consumes_and_restores() {
        let conn = setup();
        let med = insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();

        assert_eq!(adjust_supply(&conn, &med.id, 1).unwrap(), Some(9));
        assert_eq!(adjust_supply(&conn, &med.id, -1).unwrap(), Some(10));
    }

    #[test]
    fn adjust_supply_clamps_at_zero() {
        let conn = setup();
        let mut input = test_input("Metformin");
        input.current_supply = Some(1);
        let med = insert_medication(&conn, "u1", &input).unwrap();

        assert_eq!(adjust_supply(&conn, &med.id, 1).unwrap(), Some(0));
        assert_eq!(adjust_supply(&conn, &med.id, 1).unwrap(), Some(0));
    }

    #[test]
    fn adjust_supply_noop_without_tracking() {
        let conn = setup();
        let mut input = test_input("Metformin");
        input.current_supply = None;
        let med = insert_medication(&conn, "u1", &input).unwrap();

        assert_eq!(adjust_supply(&conn, &med.id, 1).unwrap(), None);
        let fetched = fetch_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(fetched.current_supply, None);
    }

    #[test]
    fn dispatch_targets_require_enabled_channel() {
        let conn = setup();
        insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();

        // No channels enabled yet
        assert!(fetch_dispatch_targets(&conn).unwrap().is_empty());

        profile::connect_telegram(&conn, "u1", "chat-123").unwrap();
        let targets = fetch_dispatch_targets(&conn).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(
            targets[0].channels.telegram_chat_id.as_deref(),
            Some("chat-123")
        );
        assert!(targets[0].channels.push_subscription.is_none());
    }

    #[test]
    fn active_on_respects_date_range() {
        let conn = setup();
        let mut input = test_input("Metformin");
        input.end_date = NaiveDate::from_ymd_opt(2024, 1, 31);
        let med = insert_medication(&conn, "u1", &input).unwrap();

        assert!(!med.active_on(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));
        assert!(med.active_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(med.active_on(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert!(!med.active_on(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn low_supply_flag() {
        let conn = setup();
        let med = insert_medication(&conn, "u1", &test_input("Metformin")).unwrap();
        assert!(!med.is_low_on_supply());

        for _ in 0..7 {
            adjust_supply(&conn, &med.id, 1).unwrap();
        }
        let med = fetch_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(med.current_supply, Some(3));
        assert!(med.is_low_on_supply());
    }
}
