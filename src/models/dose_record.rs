use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DoseStatus;

/// Per-day, per-slot, per-user adherence entry — the central mutable entity.
///
/// Invariants (enforced by the state machine in `scheduler::state` and the
/// UNIQUE key in the store):
/// - at most one record per (user, slot, day)
/// - `retry_count` never decreases
/// - `taken_at` is set iff `status == Taken`
/// - records are never deleted; they are the adherence history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub slot_id: String,
    pub day: NaiveDate,
    pub status: DoseStatus,
    pub retry_count: u32,
    pub last_reminded_at: Option<DateTime<FixedOffset>>,
    pub taken_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// Mutable fields written back by `db::repository::update_record`.
///
/// Produced only by the transition functions in `scheduler::state`, so every
/// write goes through the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: DoseStatus,
    pub retry_count: u32,
    pub last_reminded_at: Option<DateTime<FixedOffset>>,
    pub taken_at: Option<DateTime<FixedOffset>>,
}
