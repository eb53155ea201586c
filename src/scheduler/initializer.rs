//! Daily Initializer — seeds one dose record per (user, slot) for a day.
//!
//! Idempotent by construction: seeding rides on the repository's
//! find-or-create semantics, so repeated invocations (process start, day
//! boundary, first contact) never overwrite existing records.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::Connection;
use uuid::Uuid;

use super::SchedulerError;
use crate::catalog::ScheduleCatalog;
use crate::db::repository;

/// Ensure one record per catalog slot for a single user.
pub fn seed_user(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    user_id: &Uuid,
    day: NaiveDate,
    now: DateTime<FixedOffset>,
) -> Result<(), SchedulerError> {
    for slot in catalog.slots() {
        repository::find_or_create_record(conn, user_id, &slot.id, day, now)?;
    }
    tracing::debug!(user = %user_id, %day, slots = catalog.len(), "seeded dose records");
    Ok(())
}

/// Ensure records for every known user. Returns the number of users seeded.
///
/// A failure for one user is logged and does not abort seeding the rest.
pub fn seed_all(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    day: NaiveDate,
    now: DateTime<FixedOffset>,
) -> Result<usize, SchedulerError> {
    let users = repository::list_users(conn)?;
    let mut seeded = 0;
    for user in &users {
        match seed_user(conn, catalog, &user.id, day, now) {
            Ok(()) => seeded += 1,
            Err(e) => {
                tracing::warn!(user = %user.external_id, error = %e, "failed to seed user")
            }
        }
    }
    Ok(seeded)
}
