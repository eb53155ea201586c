//! User Action Handler — applies inbound chat actions to dose records.
//!
//! Actions arrive asynchronously from the transport and are applied against
//! the *stored* record, never the client's advisory retry count: the store is
//! the single source of truth, and a divergent client counter is logged and
//! ignored. First contact from an unknown user creates them and seeds all of
//! today's records before the action is applied.

use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{initializer, state, SchedulerError};
use crate::catalog::ScheduleCatalog;
use crate::clock;
use crate::config::MAX_REMINDER_ROUNDS;
use crate::db::repository;
use crate::dispatch::DispatchPort;
use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Taken,
    Snooze,
}

/// Inbound action event, as produced by the transport layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEvent {
    /// External (chat platform) user id.
    pub user_id: String,
    pub action: ActionKind,
    pub schedule_slot_id: String,
    /// Advisory counter echoed by the client. Never trusted — compared against
    /// the stored value only to flag stale events.
    #[serde(default)]
    pub reported_retry_count: Option<u32>,
    /// Display name supplied by the transport on first contact.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// What the action did to the record, for the caller's response handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Dose recorded as taken; confirmation sent.
    Taken,
    /// Snoozed with reminder rounds still available.
    Snoozed { remaining: u32 },
    /// Snoozed past the last round; exceeded-limit warning sent.
    BudgetExhausted,
    /// The record was already terminal; nothing changed, nothing sent.
    AlreadyClosed,
}

/// Apply one action event. Side effect: a confirmation or follow-up message
/// appropriate to the resulting state goes out through the dispatch port.
pub fn handle_action(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    dispatch: &dyn DispatchPort,
    event: &ActionEvent,
    now: DateTime<FixedOffset>,
) -> Result<ActionOutcome, SchedulerError> {
    let slot = catalog
        .get(&event.schedule_slot_id)
        .ok_or_else(|| SchedulerError::UnknownSlot(event.schedule_slot_id.clone()))?;

    let user = resolve_user(conn, catalog, event, now)?;
    let day = clock::day_key(now);
    let record = repository::find_or_create_record(conn, &user.id, &slot.id, day, now)?;

    if let Some(reported) = event.reported_retry_count {
        if reported != record.retry_count {
            // Stale client state; the stored counter stays authoritative.
            tracing::warn!(
                user = %user.external_id,
                slot = %slot.id,
                reported,
                stored = record.retry_count,
                "action event retry count diverges from store"
            );
        }
    }

    match event.action {
        ActionKind::Taken => {
            let Some(update) = state::acknowledge(&record, now) else {
                tracing::debug!(
                    user = %user.external_id,
                    slot = %slot.id,
                    status = record.status.as_str(),
                    "acknowledge on closed record ignored"
                );
                return Ok(ActionOutcome::AlreadyClosed);
            };
            repository::update_record(conn, &record.id, &update, now)?;
            tracing::info!(user = %user.external_id, slot = %slot.id, "dose taken");

            let text = format!("Recorded \"{}\" as taken. Well done!", slot.meal_label);
            if !dispatch.send_notice(&user.external_id, &text) {
                tracing::warn!(user = %user.external_id, "confirmation dispatch failed");
            }
            Ok(ActionOutcome::Taken)
        }
        ActionKind::Snooze => {
            let Some(update) = state::snooze(&record, now) else {
                return Ok(ActionOutcome::AlreadyClosed);
            };
            repository::update_record(conn, &record.id, &update, now)?;
            tracing::info!(
                user = %user.external_id,
                slot = %slot.id,
                round = update.retry_count,
                "dose snoozed"
            );

            if update.retry_count >= MAX_REMINDER_ROUNDS {
                let text = format!(
                    "That was the last snooze for \"{}\". No reminders left, please take it now if you can.",
                    slot.meal_label
                );
                if !dispatch.send_notice(&user.external_id, &text) {
                    tracing::warn!(user = %user.external_id, "warning dispatch failed");
                }
                Ok(ActionOutcome::BudgetExhausted)
            } else {
                let remaining = MAX_REMINDER_ROUNDS - update.retry_count;
                let text = format!(
                    "Snoozed \"{}\". I'll remind you again in a bit ({remaining} reminder(s) left today).",
                    slot.meal_label
                );
                if !dispatch.send_notice(&user.external_id, &text) {
                    tracing::warn!(user = %user.external_id, "snooze confirmation dispatch failed");
                }
                Ok(ActionOutcome::Snoozed { remaining })
            }
        }
    }
}

/// Look up the acting user, creating and seeding them on first contact.
fn resolve_user(
    conn: &Connection,
    catalog: &ScheduleCatalog,
    event: &ActionEvent,
    now: DateTime<FixedOffset>,
) -> Result<User, SchedulerError> {
    if let Some(user) = repository::find_user(conn, &event.user_id)? {
        return Ok(user);
    }

    let display_name = event.display_name.as_deref().unwrap_or(&event.user_id);
    let user = repository::find_or_create_user(conn, &event.user_id, display_name, now)?;
    tracing::info!(user = %user.external_id, "first contact, seeding today's records");
    initializer::seed_user(conn, catalog, &user.id, clock::day_key(now), now)?;
    Ok(user)
}
