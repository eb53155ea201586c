//! Reminder Trigger Engine — decides, on each evaluation tick, which dose
//! records get a (re)reminder and drives the state machine accordingly.
//!
//! Strategy: a single recurring tick that computes due-ness from timestamps.
//! Ticks are idempotent against the store — a missed tick is self-corrected
//! by the next one — so the ticker task can be aborted and resumed freely.
//!
//! Dispatch commit ordering:
//! - regular reminders are at-most-once: send first, commit the snoozed
//!   transition only when the send succeeded, so a failed send leaves the
//!   record untouched and the next tick retries naturally;
//! - the final missed transition is authoritative: the exceeded notice is
//!   best-effort and Missed persists regardless of delivery.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use rusqlite::Connection;
use tokio::task::JoinHandle;
use tokio::time;

use super::{state, SchedulerError};
use crate::app::App;
use crate::catalog::{Prerequisite, ScheduleSlot, ScheduleCatalog};
use crate::clock;
use crate::config::{MAX_REMINDER_ROUNDS, REMINDER_COOLDOWN_MINUTES, TICK_INTERVAL_SECS};
use crate::db::{repository, DatabaseError};
use crate::dispatch::{DispatchPort, ReminderPayload};
use crate::models::{DoseRecord, User};

/// What one evaluation tick did, for summary logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reminded: u32,
    pub expired: u32,
    pub dispatch_failures: u32,
}

impl TickReport {
    pub fn had_activity(&self) -> bool {
        self.reminded > 0 || self.expired > 0 || self.dispatch_failures > 0
    }
}

enum Evaluation {
    Skipped,
    Reminded,
    Expired,
    DispatchFailed,
}

/// Evaluate every (user, slot) record for the day of `now`.
///
/// A failure on one record is logged and never aborts the rest of the tick.
pub fn tick(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    dispatch: &dyn DispatchPort,
    now: DateTime<FixedOffset>,
) -> Result<TickReport, SchedulerError> {
    let day = clock::day_key(now);
    let users = repository::list_users(conn)?;

    let mut report = TickReport::default();
    for user in &users {
        for slot in catalog.slots() {
            match evaluate_record(conn, catalog, dispatch, user, slot, day, now) {
                Ok(Evaluation::Reminded) => report.reminded += 1,
                Ok(Evaluation::Expired) => report.expired += 1,
                Ok(Evaluation::DispatchFailed) => report.dispatch_failures += 1,
                Ok(Evaluation::Skipped) => {}
                Err(e) => {
                    tracing::warn!(
                        user = %user.external_id,
                        slot = %slot.id,
                        error = %e,
                        "record evaluation failed"
                    );
                }
            }
        }
    }
    Ok(report)
}

fn evaluate_record(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    dispatch: &dyn DispatchPort,
    user: &User,
    slot: &ScheduleSlot,
    day: NaiveDate,
    now: DateTime<FixedOffset>,
) -> Result<Evaluation, SchedulerError> {
    let Some(record) = repository::find_record(conn, &user.id, &slot.id, day)? else {
        // Initializer has not seeded this pair yet; nothing to do.
        return Ok(Evaluation::Skipped);
    };

    if record.status.is_terminal() {
        return Ok(Evaluation::Skipped);
    }

    // Dependent doses never remind ahead of their prerequisite.
    if let Some(prereq) = &slot.prerequisite {
        if !prerequisite_satisfied(conn, user, prereq, day, now)? {
            return Ok(Evaluation::Skipped);
        }
    }

    if state::budget_exhausted(&record) {
        return expire_record(conn, dispatch, user, slot, &record, now);
    }

    if !is_due(&record, slot, now) {
        return Ok(Evaluation::Skipped);
    }

    send_reminder(conn, dispatch, user, slot, &record, now)
}

/// Send one reminder and commit the snoozed transition on delivery success.
/// Shared by the tick path and the admin force-remind entry point.
fn send_reminder(
    conn: &Connection,
    dispatch: &dyn DispatchPort,
    user: &User,
    slot: &ScheduleSlot,
    record: &DoseRecord,
    now: DateTime<FixedOffset>,
) -> Result<Evaluation, SchedulerError> {
    let payload = ReminderPayload {
        slot_id: slot.id.clone(),
        meal_label: slot.meal_label.clone(),
        drugs: slot.drugs.clone(),
        retry_count: record.retry_count,
    };

    if !dispatch.send_reminder(&user.external_id, &payload) {
        tracing::warn!(
            user = %user.external_id,
            slot = %slot.id,
            "reminder dispatch failed, record left untouched for next tick"
        );
        return Ok(Evaluation::DispatchFailed);
    }

    if let Some(update) = state::remind(record, now) {
        repository::update_record(conn, &record.id, &update, now)?;
        tracing::info!(
            user = %user.external_id,
            slot = %slot.id,
            round = update.retry_count,
            "reminder sent"
        );
    }
    Ok(Evaluation::Reminded)
}

fn expire_record(
    conn: &Connection,
    dispatch: &dyn DispatchPort,
    user: &User,
    slot: &ScheduleSlot,
    record: &DoseRecord,
    now: DateTime<FixedOffset>,
) -> Result<Evaluation, SchedulerError> {
    // Send-then-update, and the update happens regardless of delivery: the
    // missed state is authoritative, the warning is best-effort. The status
    // guard in state::expire keeps the notice from ever repeating.
    let text = format!(
        "No response after {MAX_REMINDER_ROUNDS} reminders for \"{}\". Today's dose is marked as missed.",
        slot.meal_label
    );
    if !dispatch.send_notice(&user.external_id, &text) {
        tracing::warn!(user = %user.external_id, slot = %slot.id, "exceeded notice dispatch failed");
    }

    if let Some(update) = state::expire(record) {
        repository::update_record(conn, &record.id, &update, now)?;
        tracing::info!(user = %user.external_id, slot = %slot.id, "dose marked as missed");
    }
    Ok(Evaluation::Expired)
}

/// Admin entry point: fire one reminder immediately, bypassing the due-check
/// and prerequisite gate but not the state machine. Returns false when the
/// record is already closed or delivery failed.
pub fn force_remind(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    dispatch: &dyn DispatchPort,
    external_user_id: &str,
    slot_id: &str,
    now: DateTime<FixedOffset>,
) -> Result<bool, SchedulerError> {
    let slot = catalog
        .get(slot_id)
        .ok_or_else(|| SchedulerError::UnknownSlot(slot_id.into()))?;
    let user = repository::find_user(conn, external_user_id)?.ok_or_else(|| {
        SchedulerError::Database(DatabaseError::NotFound {
            entity_type: "User".into(),
            id: external_user_id.into(),
        })
    })?;

    let day = clock::day_key(now);
    let record = repository::find_or_create_record(conn, &user.id, slot_id, day, now)?;
    if record.status.is_terminal() {
        return Ok(false);
    }

    match send_reminder(conn, dispatch, &user, slot, &record, now)? {
        Evaluation::Reminded => Ok(true),
        _ => Ok(false),
    }
}

fn is_due(record: &DoseRecord, slot: &ScheduleSlot, now: DateTime<FixedOffset>) -> bool {
    match record.last_reminded_at {
        // A round already went out (engine reminder or user snooze):
        // wait out the cooldown window.
        Some(last) => now.signed_duration_since(last) >= Duration::minutes(REMINDER_COOLDOWN_MINUTES),
        // First round: due once the slot's time-of-day has arrived.
        None => now >= clock::slot_datetime(record.day, slot.time_of_day),
    }
}

fn prerequisite_satisfied(
    conn: &Connection,
    user: &User,
    prereq: &Prerequisite,
    day: NaiveDate,
    now: DateTime<FixedOffset>,
) -> Result<bool, DatabaseError> {
    let Some(pre) = repository::find_record(conn, &user.id, &prereq.slot_id, day)? else {
        return Ok(false);
    };
    let Some(taken_at) = pre.taken_at else {
        return Ok(false);
    };
    Ok(now.signed_duration_since(taken_at) >= Duration::minutes(prereq.delay_minutes))
}

/// Run the engine on the fixed cadence until the task is aborted.
///
/// Re-runs the daily initializer when the reference-timezone day key changes,
/// which also self-heals after downtime spanning a day boundary.
pub fn spawn_ticker(app: Arc<App>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(StdDuration::from_secs(TICK_INTERVAL_SECS));
        let mut current_day = clock::day_key(clock::reference_now());
        tracing::info!(interval_secs = TICK_INTERVAL_SECS, "reminder ticker started");

        loop {
            interval.tick().await;
            let now = clock::reference_now();
            let day = clock::day_key(now);

            if day != current_day {
                current_day = day;
                match app.seed_today() {
                    Ok(seeded) => tracing::info!(%day, seeded, "day boundary: records seeded"),
                    Err(e) => tracing::error!(%day, error = %e, "day boundary seeding failed"),
                }
            }

            match app.run_tick(now) {
                Ok(report) if report.had_activity() => {
                    tracing::info!(
                        reminded = report.reminded,
                        expired = report.expired,
                        dispatch_failures = report.dispatch_failures,
                        "tick complete"
                    );
                }
                Ok(_) => tracing::debug!("tick complete, no activity"),
                Err(e) => tracing::error!(error = %e, "tick failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::at;
    use crate::db::open_memory_database;
    use crate::dispatch::testing::{RecordingDispatch, SentMessage};
    use crate::models::DoseStatus;
    use crate::scheduler::initializer;
    use chrono::NaiveTime;

    fn slot(id: &str, hour: u32, minute: u32) -> ScheduleSlot {
        ScheduleSlot {
            id: id.into(),
            meal_label: format!("After {id}"),
            time_of_day: NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            drugs: vec!["Metformin 500mg".into()],
            prerequisite: None,
        }
    }

    fn lunch_catalog() -> ScheduleCatalog {
        ScheduleCatalog::from_slots(vec![slot("lunch", 13, 0)]).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    struct Fixture {
        conn: Connection,
        catalog: ScheduleCatalog,
        dispatch: RecordingDispatch,
        user_id: uuid::Uuid,
    }

    fn fixture(catalog: ScheduleCatalog) -> Fixture {
        let conn = open_memory_database().unwrap();
        let now = at(2025, 3, 1, 0, 5);
        let user = repository::find_or_create_user(&conn, "ext-1", "Amy", now).unwrap();
        initializer::seed_user(&conn, &catalog, &user.id, day(), now).unwrap();
        Fixture {
            conn,
            catalog,
            dispatch: RecordingDispatch::new(),
            user_id: user.id,
        }
    }

    fn lunch_record(f: &Fixture) -> DoseRecord {
        repository::find_record(&f.conn, &f.user_id, "lunch", day())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn no_reminder_before_slot_time() {
        let f = fixture(lunch_catalog());
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 12, 59)).unwrap();
        assert!(!report.had_activity());
        assert_eq!(f.dispatch.reminder_count(), 0);
        assert_eq!(lunch_record(&f).status, DoseStatus::Pending);
    }

    #[test]
    fn first_reminder_fires_at_slot_time() {
        let f = fixture(lunch_catalog());
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 0)).unwrap();
        assert_eq!(report.reminded, 1);

        let record = lunch_record(&f);
        assert_eq!(record.status, DoseStatus::Snoozed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_reminded_at, Some(at(2025, 3, 1, 13, 0)));

        // The payload carries the pre-increment round so the message can say "attempt 1"
        assert_eq!(
            f.dispatch.messages(),
            vec![SentMessage::Reminder {
                user: "ext-1".into(),
                slot: "lunch".into(),
                retry_count: 0,
            }]
        );
    }

    #[test]
    fn cooldown_respected() {
        let f = fixture(lunch_catalog());
        tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 0)).unwrap();

        // 10 minutes later: inside the 30-minute cooldown, nothing fires
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 10)).unwrap();
        assert_eq!(report.reminded, 0);
        assert_eq!(f.dispatch.reminder_count(), 1);

        // 31 minutes after the first reminder: due again
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 31)).unwrap();
        assert_eq!(report.reminded, 1);
        assert_eq!(f.dispatch.reminder_count(), 2);
        assert_eq!(lunch_record(&f).retry_count, 2);
    }

    #[test]
    fn retry_ceiling_marks_missed_with_single_notice() {
        let f = fixture(lunch_catalog());
        for (h, m) in [(13, 0), (13, 31), (14, 2)] {
            let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, h, m)).unwrap();
            assert_eq!(report.reminded, 1);
        }
        assert_eq!(lunch_record(&f).retry_count, 3);

        // 4th evaluation: budget exhausted, record expires with one notice
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, 3)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(lunch_record(&f).status, DoseStatus::Missed);
        assert_eq!(f.dispatch.reminder_count(), 3);
        assert_eq!(f.dispatch.notice_count(), 1);

        // Subsequent ticks must not repeat the notice or touch the record
        for m in [4, 5, 40] {
            let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, m)).unwrap();
            assert!(!report.had_activity());
        }
        assert_eq!(f.dispatch.notice_count(), 1);
        assert_eq!(lunch_record(&f).retry_count, 3);
    }

    #[test]
    fn acknowledged_record_is_never_reminded() {
        let f = fixture(lunch_catalog());
        tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 0)).unwrap();

        let record = lunch_record(&f);
        let taken_at = at(2025, 3, 1, 13, 5);
        let update = state::acknowledge(&record, taken_at).unwrap();
        repository::update_record(&f.conn, &record.id, &update, taken_at).unwrap();

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, 0)).unwrap();
        assert!(!report.had_activity());
        assert_eq!(f.dispatch.reminder_count(), 1);

        let after = lunch_record(&f);
        assert_eq!(after.status, DoseStatus::Taken);
        assert_eq!(after.taken_at, Some(taken_at));
    }

    #[test]
    fn failed_dispatch_commits_nothing() {
        let f = fixture(lunch_catalog());
        f.dispatch.fail_deliveries();

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 0)).unwrap();
        assert_eq!(report.dispatch_failures, 1);
        assert_eq!(report.reminded, 0);

        // Record untouched: no round consumed, no cooldown anchor
        let record = lunch_record(&f);
        assert_eq!(record.status, DoseStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.last_reminded_at, None);

        // Channel recovers: the very next tick retries
        f.dispatch.restore_deliveries();
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 1)).unwrap();
        assert_eq!(report.reminded, 1);
        assert_eq!(lunch_record(&f).retry_count, 1);
    }

    #[test]
    fn missed_persists_even_when_notice_fails() {
        let f = fixture(lunch_catalog());
        for (h, m) in [(13, 0), (13, 31), (14, 2)] {
            tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, h, m)).unwrap();
        }

        f.dispatch.fail_deliveries();
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, 3)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(lunch_record(&f).status, DoseStatus::Missed);

        // Recovery does not resurrect the notice: the transition already closed the record
        f.dispatch.restore_deliveries();
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, 4)).unwrap();
        assert!(!report.had_activity());
        assert_eq!(f.dispatch.notice_count(), 1);
    }

    #[test]
    fn prerequisite_gates_dependent_slot() {
        let mut herbal = slot("herbal", 8, 0);
        herbal.prerequisite = Some(Prerequisite {
            slot_id: "western".into(),
            delay_minutes: 60,
        });
        let catalog =
            ScheduleCatalog::from_slots(vec![slot("western", 8, 0), herbal]).unwrap();
        let f = fixture(catalog);

        // Western fires at 08:00; herbal stays pending no matter how many ticks pass
        for m in [0, 31, 45, 59] {
            tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 8, m)).unwrap();
        }
        let herbal = repository::find_record(&f.conn, &f.user_id, "herbal", day())
            .unwrap()
            .unwrap();
        assert_eq!(herbal.status, DoseStatus::Pending);
        assert_eq!(herbal.retry_count, 0);

        // User takes the western dose at 09:00
        let western = repository::find_record(&f.conn, &f.user_id, "western", day())
            .unwrap()
            .unwrap();
        let taken_at = at(2025, 3, 1, 9, 0);
        let update = state::acknowledge(&western, taken_at).unwrap();
        repository::update_record(&f.conn, &western.id, &update, taken_at).unwrap();

        // 30 minutes after: the 60-minute delay has not elapsed
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 9, 30)).unwrap();
        assert_eq!(report.reminded, 0);

        // 60 minutes after: herbal becomes eligible
        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 10, 0)).unwrap();
        assert_eq!(report.reminded, 1);
        let herbal = repository::find_record(&f.conn, &f.user_id, "herbal", day())
            .unwrap()
            .unwrap();
        assert_eq!(herbal.status, DoseStatus::Snoozed);
        assert_eq!(herbal.retry_count, 1);
    }

    #[test]
    fn missing_prerequisite_record_gates_too() {
        let mut dependent = slot("bedtime", 22, 0);
        dependent.prerequisite = Some(Prerequisite {
            slot_id: "dinner".into(),
            delay_minutes: 0,
        });
        let catalog =
            ScheduleCatalog::from_slots(vec![slot("dinner", 18, 30), dependent]).unwrap();

        // Seed only the dependent slot, as if the dinner record never existed
        let conn = open_memory_database().unwrap();
        let now = at(2025, 3, 1, 0, 5);
        let user = repository::find_or_create_user(&conn, "ext-1", "Amy", now).unwrap();
        repository::find_or_create_record(&conn, &user.id, "bedtime", day(), now).unwrap();

        let dispatch = RecordingDispatch::new();
        let report = tick(&conn, &catalog, &dispatch, at(2025, 3, 1, 22, 30)).unwrap();
        assert_eq!(report.reminded, 0);
        assert_eq!(dispatch.reminder_count(), 0);
    }

    #[test]
    fn force_remind_bypasses_due_check() {
        let f = fixture(lunch_catalog());

        // Hours before slot time; a regular tick would skip
        let fired = force_remind(
            &f.conn,
            &f.catalog,
            &f.dispatch,
            "ext-1",
            "lunch",
            at(2025, 3, 1, 9, 0),
        )
        .unwrap();
        assert!(fired);
        assert_eq!(lunch_record(&f).retry_count, 1);
    }

    #[test]
    fn force_remind_respects_terminal_states() {
        let f = fixture(lunch_catalog());
        let record = lunch_record(&f);
        let taken_at = at(2025, 3, 1, 12, 0);
        let update = state::acknowledge(&record, taken_at).unwrap();
        repository::update_record(&f.conn, &record.id, &update, taken_at).unwrap();

        let fired = force_remind(
            &f.conn,
            &f.catalog,
            &f.dispatch,
            "ext-1",
            "lunch",
            at(2025, 3, 1, 13, 0),
        )
        .unwrap();
        assert!(!fired);
        assert_eq!(f.dispatch.reminder_count(), 0);
    }

    #[test]
    fn force_remind_unknown_slot_errors() {
        let f = fixture(lunch_catalog());
        let err = force_remind(
            &f.conn,
            &f.catalog,
            &f.dispatch,
            "ext-1",
            "brunch",
            at(2025, 3, 1, 13, 0),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownSlot(_)));
    }

    // Full day in the life of a lunch dose: reminders at 13:00 and 13:31,
    // taken at 13:35, later ticks are no-ops.
    #[test]
    fn lunch_day_end_to_end() {
        let f = fixture(lunch_catalog());

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 0)).unwrap();
        assert_eq!(report.reminded, 1);
        assert_eq!(lunch_record(&f).retry_count, 1);

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 25)).unwrap();
        assert!(!report.had_activity());

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 13, 31)).unwrap();
        assert_eq!(report.reminded, 1);
        assert_eq!(lunch_record(&f).retry_count, 2);

        let record = lunch_record(&f);
        let taken_at = at(2025, 3, 1, 13, 35);
        let update = state::acknowledge(&record, taken_at).unwrap();
        repository::update_record(&f.conn, &record.id, &update, taken_at).unwrap();

        let report = tick(&f.conn, &f.catalog, &f.dispatch, at(2025, 3, 1, 14, 0)).unwrap();
        assert!(!report.had_activity());

        let final_record = lunch_record(&f);
        assert_eq!(final_record.status, DoseStatus::Taken);
        assert_eq!(final_record.taken_at, Some(taken_at));
        assert_eq!(final_record.retry_count, 2);
        assert_eq!(f.dispatch.reminder_count(), 2);
    }
}
