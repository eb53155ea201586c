//! Repository functions for users and dose records.
//!
//! Find-or-create is the only way records come into existence: the INSERT OR
//! IGNORE + UNIQUE key combination guarantees at most one record per
//! (user, slot, day) even when the trigger engine and an inbound action race.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::DatabaseError;
use crate::models::{DoseRecord, DoseStatus, RecordUpdate, User};

// ═══════════════════════════════════════════
// User repository
// ═══════════════════════════════════════════

/// Look up a user by the chat platform's external id.
pub fn find_user(conn: &Connection, external_id: &str) -> Result<Option<User>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, external_id, display_name, created_at
         FROM users WHERE external_id = ?1",
    )?;

    let result = stmt.query_row(params![external_id], |row| {
        Ok(UserRow {
            id: row.get::<_, String>(0)?,
            external_id: row.get::<_, String>(1)?,
            display_name: row.get::<_, String>(2)?,
            created_at: row.get::<_, String>(3)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(user_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Find a user by external id, creating them on first contact.
pub fn find_or_create_user(
    conn: &Connection,
    external_id: &str,
    display_name: &str,
    now: DateTime<FixedOffset>,
) -> Result<User, DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO users (id, external_id, display_name, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            Uuid::new_v4().to_string(),
            external_id,
            display_name,
            now.to_rfc3339(),
        ],
    )?;

    find_user(conn, external_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "User".into(),
        id: external_id.into(),
    })
}

/// All known users, oldest first.
pub fn list_users(conn: &Connection) -> Result<Vec<User>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, external_id, display_name, created_at
         FROM users ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(UserRow {
            id: row.get::<_, String>(0)?,
            external_id: row.get::<_, String>(1)?,
            display_name: row.get::<_, String>(2)?,
            created_at: row.get::<_, String>(3)?,
        })
    })?;

    let mut users = Vec::new();
    for row in rows {
        users.push(user_from_row(row?)?);
    }
    Ok(users)
}

// Internal row type for User mapping
struct UserRow {
    id: String,
    external_id: String,
    display_name: String,
    created_at: String,
}

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    Ok(User {
        id: parse_uuid(&row.id)?,
        external_id: row.external_id,
        display_name: row.display_name,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

// ═══════════════════════════════════════════
// Dose record repository
// ═══════════════════════════════════════════

const RECORD_COLUMNS: &str = "id, user_id, slot_id, day, status, retry_count,
         last_reminded_at, taken_at, created_at, updated_at";

/// Look up the record for a (user, slot, day) key.
pub fn find_record(
    conn: &Connection,
    user_id: &Uuid,
    slot_id: &str,
    day: NaiveDate,
) -> Result<Option<DoseRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM dose_records
         WHERE user_id = ?1 AND slot_id = ?2 AND day = ?3"
    ))?;

    let result = stmt.query_row(
        params![user_id.to_string(), slot_id, day.to_string()],
        record_row,
    );

    match result {
        Ok(row) => Ok(Some(record_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Find the record for a (user, slot, day) key, creating a fresh pending one
/// if none exists. Never overwrites an existing record.
pub fn find_or_create_record(
    conn: &Connection,
    user_id: &Uuid,
    slot_id: &str,
    day: NaiveDate,
    now: DateTime<FixedOffset>,
) -> Result<DoseRecord, DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO dose_records
         (id, user_id, slot_id, day, status, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
        params![
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            slot_id,
            day.to_string(),
            now.to_rfc3339(),
        ],
    )?;

    find_record(conn, user_id, slot_id, day)?.ok_or_else(|| {
        DatabaseError::ConstraintViolation(format!(
            "dose record missing after find-or-create: user={user_id} slot={slot_id} day={day}"
        ))
    })
}

/// Apply a state-machine update to a record and return the stored result.
pub fn update_record(
    conn: &Connection,
    record_id: &Uuid,
    update: &RecordUpdate,
    now: DateTime<FixedOffset>,
) -> Result<DoseRecord, DatabaseError> {
    let changed = conn.execute(
        "UPDATE dose_records
         SET status = ?1, retry_count = ?2, last_reminded_at = ?3, taken_at = ?4,
             updated_at = ?5
         WHERE id = ?6",
        params![
            update.status.as_str(),
            update.retry_count,
            update.last_reminded_at.map(|t| t.to_rfc3339()),
            update.taken_at.map(|t| t.to_rfc3339()),
            now.to_rfc3339(),
            record_id.to_string(),
        ],
    )?;

    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "DoseRecord".into(),
            id: record_id.to_string(),
        });
    }

    get_record(conn, record_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "DoseRecord".into(),
        id: record_id.to_string(),
    })
}

/// Fetch a record by primary key.
pub fn get_record(conn: &Connection, record_id: &Uuid) -> Result<Option<DoseRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM dose_records WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![record_id.to_string()], record_row);

    match result {
        Ok(row) => Ok(Some(record_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Records for a day still in a reminder-eligible state (pending or snoozed).
pub fn list_open_records(conn: &Connection, day: NaiveDate) -> Result<Vec<DoseRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM dose_records
         WHERE day = ?1 AND status IN ('pending', 'snoozed')
         ORDER BY user_id, slot_id"
    ))?;

    let rows = stmt.query_map(params![day.to_string()], record_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(record_from_row(row?)?);
    }
    Ok(records)
}

/// All of one user's records for a day, for the status view.
pub fn list_user_records(
    conn: &Connection,
    user_id: &Uuid,
    day: NaiveDate,
) -> Result<Vec<DoseRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM dose_records
         WHERE user_id = ?1 AND day = ?2
         ORDER BY slot_id"
    ))?;

    let rows = stmt.query_map(params![user_id.to_string(), day.to_string()], record_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(record_from_row(row?)?);
    }
    Ok(records)
}

// Internal row type for DoseRecord mapping
struct DoseRecordRow {
    id: String,
    user_id: String,
    slot_id: String,
    day: String,
    status: String,
    retry_count: i64,
    last_reminded_at: Option<String>,
    taken_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DoseRecordRow> {
    Ok(DoseRecordRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        slot_id: row.get(2)?,
        day: row.get(3)?,
        status: row.get(4)?,
        retry_count: row.get(5)?,
        last_reminded_at: row.get(6)?,
        taken_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn record_from_row(row: DoseRecordRow) -> Result<DoseRecord, DatabaseError> {
    Ok(DoseRecord {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        slot_id: row.slot_id,
        day: NaiveDate::parse_from_str(&row.day, "%Y-%m-%d")
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        status: DoseStatus::from_str(&row.status)?,
        retry_count: row.retry_count.max(0) as u32,
        last_reminded_at: row.last_reminded_at.as_deref().map(parse_timestamp).transpose()?,
        taken_at: row.taken_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, DatabaseError> {
    DateTime::parse_from_rfc3339(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}
