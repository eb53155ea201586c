//! Dose State Machine — the lifecycle of one dose record across a day.
//!
//! Pure functions over a record snapshot. Each returns `Some(RecordUpdate)`
//! when a transition applies, `None` when the input state absorbs the event
//! (terminal states, repeated acknowledgments). Callers persist the update
//! through `db::repository::update_record` while holding the store lock, so
//! a snapshot is never stale at commit time.
//!
//! ```text
//!            acknowledge                acknowledge
//!   Pending ─────────────→ Taken   Snoozed ─────────→ Taken
//!      │ snooze/remind        ▲        │ snooze/remind
//!      ▼                      │        ▼ (retry_count += 1)
//!   Snoozed ──────────────────┘     Snoozed
//!      │ expire (retry_count >= max)
//!      ▼
//!   Missed
//! ```

use chrono::{DateTime, FixedOffset};

use crate::config::MAX_REMINDER_ROUNDS;
use crate::models::{DoseRecord, DoseStatus, RecordUpdate};

/// User confirmed the dose. Sets `taken_at` exactly once; idempotent on an
/// already-taken record and absorbed by Missed.
pub fn acknowledge(record: &DoseRecord, now: DateTime<FixedOffset>) -> Option<RecordUpdate> {
    if record.status.is_terminal() {
        return None;
    }
    Some(RecordUpdate {
        status: DoseStatus::Taken,
        retry_count: record.retry_count,
        last_reminded_at: record.last_reminded_at,
        taken_at: Some(now),
    })
}

/// User explicitly deferred the dose. The snooze counts as a reminder round:
/// the counter advances and the cooldown window restarts from `now`.
pub fn snooze(record: &DoseRecord, now: DateTime<FixedOffset>) -> Option<RecordUpdate> {
    bump_round(record, now)
}

/// The trigger engine dispatched an automatic reminder — same effect on the
/// record as a user snooze.
pub fn remind(record: &DoseRecord, now: DateTime<FixedOffset>) -> Option<RecordUpdate> {
    bump_round(record, now)
}

fn bump_round(record: &DoseRecord, now: DateTime<FixedOffset>) -> Option<RecordUpdate> {
    if record.status.is_terminal() {
        return None;
    }
    Some(RecordUpdate {
        status: DoseStatus::Snoozed,
        retry_count: record.retry_count.saturating_add(1),
        last_reminded_at: Some(now),
        taken_at: None,
    })
}

/// Retry budget exhausted: terminal failure. Applies only while the record is
/// still open, so the transition (and its one-time notification) cannot fire
/// twice.
pub fn expire(record: &DoseRecord) -> Option<RecordUpdate> {
    if record.status.is_terminal() || record.retry_count < MAX_REMINDER_ROUNDS {
        return None;
    }
    Some(RecordUpdate {
        status: DoseStatus::Missed,
        retry_count: record.retry_count,
        last_reminded_at: record.last_reminded_at,
        taken_at: None,
    })
}

/// Whether the record has consumed its full reminder budget.
pub fn budget_exhausted(record: &DoseRecord) -> bool {
    record.retry_count >= MAX_REMINDER_ROUNDS
}
