//! Pillwise — reminder scheduling core for a chat-based medication
//! adherence assistant.
//!
//! For every (user, schedule slot, calendar day) the core keeps one dose
//! record and drives it through pending → snoozed → taken/missed: the
//! trigger engine evaluates due-ness on a fixed cadence and dispatches
//! reminders with a bounded retry budget, while user actions (acknowledge,
//! snooze) arrive asynchronously and resolve against the same store.
//!
//! Chat transport, webhook routing and message rendering live outside this
//! crate behind the [`dispatch::DispatchPort`] trait.

pub mod app;
pub mod catalog;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod models;
pub mod scheduler;
