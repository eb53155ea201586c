//! Reference-timezone time helpers.
//!
//! Everything temporal in the scheduler — "today", slot time-of-day matches,
//! cooldown arithmetic — is computed in the fixed reference timezone from
//! `config::reference_offset()`. Components never call `Utc::now()` directly;
//! they take a `DateTime<FixedOffset>` argument so tests can pin the clock.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::config;

/// Current instant in the reference timezone.
pub fn reference_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&config::reference_offset())
}

/// Stable calendar-day key for an instant.
pub fn day_key(at: DateTime<FixedOffset>) -> NaiveDate {
    at.date_naive()
}

/// The instant a slot's time-of-day falls on for a given day.
pub fn slot_datetime(day: NaiveDate, time_of_day: NaiveTime) -> DateTime<FixedOffset> {
    let offset = config::reference_offset();
    let local = day.and_time(time_of_day);
    DateTime::from_naive_utc_and_offset(local - offset, offset)
}
