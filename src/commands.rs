//! Administrative surface — thin entry points into the scheduler core.
//!
//! These are direct calls into the initializer, engine and action paths; no
//! separate logic lives here beyond view shaping.

use chrono::{DateTime, FixedOffset, NaiveTime};
use serde::Serialize;

use crate::app::App;
use crate::clock;
use crate::db::{repository, DatabaseError};
use crate::models::User;
use crate::scheduler::{engine, initializer, SchedulerError};

/// Per-slot adherence status for today, serialised for operators/frontends.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatusView {
    pub slot_id: String,
    pub meal_label: String,
    pub time_of_day: NaiveTime,
    pub status: String,
    pub retry_count: u32,
    pub last_reminded_at: Option<DateTime<FixedOffset>>,
    pub taken_at: Option<DateTime<FixedOffset>>,
}

/// Register (or re-register) a user and seed today's records.
pub fn register_user(
    app: &App,
    external_id: &str,
    display_name: &str,
) -> Result<User, SchedulerError> {
    let now = clock::reference_now();
    let conn = app.lock_db()?;
    let user = repository::find_or_create_user(&conn, external_id, display_name, now)?;
    initializer::seed_user(&conn, app.catalog(), &user.id, clock::day_key(now), now)?;
    Ok(user)
}

/// Fire one reminder for a slot right now, bypassing the due-check.
pub fn force_remind(app: &App, external_id: &str, slot_id: &str) -> Result<bool, SchedulerError> {
    let now = clock::reference_now();
    let conn = app.lock_db()?;
    engine::force_remind(&conn, app.catalog(), app.dispatch(), external_id, slot_id, now)
}

/// Today's status per slot for a user, in catalog order.
pub fn today_status(app: &App, external_id: &str) -> Result<Vec<SlotStatusView>, SchedulerError> {
    let now = clock::reference_now();
    let day = clock::day_key(now);
    let conn = app.lock_db()?;

    let user = repository::find_user(&conn, external_id)?.ok_or_else(|| {
        SchedulerError::Database(DatabaseError::NotFound {
            entity_type: "User".into(),
            id: external_id.into(),
        })
    })?;

    let mut views = Vec::with_capacity(app.catalog().len());
    for slot in app.catalog().slots() {
        let record = repository::find_record(&conn, &user.id, &slot.id, day)?;
        let view = match record {
            Some(record) => SlotStatusView {
                slot_id: slot.id.clone(),
                meal_label: slot.meal_label.clone(),
                time_of_day: slot.time_of_day,
                status: record.status.as_str().to_string(),
                retry_count: record.retry_count,
                last_reminded_at: record.last_reminded_at,
                taken_at: record.taken_at,
            },
            // Not seeded yet today: present as an untouched pending slot
            None => SlotStatusView {
                slot_id: slot.id.clone(),
                meal_label: slot.meal_label.clone(),
                time_of_day: slot.time_of_day,
                status: "pending".to_string(),
                retry_count: 0,
                last_reminded_at: None,
                taken_at: None,
            },
        };
        views.push(view);
    }
    Ok(views)
}
