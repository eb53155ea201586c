//! Shared application state.
//!
//! `App` owns the collaborators every entry point needs: the SQLite store,
//! the schedule catalog, and the dispatch port. All collaborators are
//! injected at construction so tests substitute fakes freely.
//!
//! The single store mutex is the linearization point required for dose
//! records: the ticker task and inbound actions both acquire it for each
//! read-modify-write, so an acknowledge landing while a tick is in flight can
//! never interleave with the same record's reminder commit.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;

use crate::catalog::ScheduleCatalog;
use crate::clock;
use crate::dispatch::DispatchPort;
use crate::scheduler::actions::{self, ActionEvent, ActionOutcome};
use crate::scheduler::engine::{self, TickReport};
use crate::scheduler::{initializer, SchedulerError};

pub struct App {
    db: Mutex<Connection>,
    catalog: ScheduleCatalog,
    dispatch: Box<dyn DispatchPort>,
}

impl App {
    pub fn new(conn: Connection, catalog: ScheduleCatalog, dispatch: Box<dyn DispatchPort>) -> Self {
        Self {
            db: Mutex::new(conn),
            catalog,
            dispatch,
        }
    }

    pub fn catalog(&self) -> &ScheduleCatalog {
        &self.catalog
    }

    pub(crate) fn dispatch(&self) -> &dyn DispatchPort {
        self.dispatch.as_ref()
    }

    pub(crate) fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.db.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Seed today's records for every known user (process start, day boundary).
    pub fn seed_today(&self) -> Result<usize, SchedulerError> {
        let now = clock::reference_now();
        let conn = self.lock_db()?;
        initializer::seed_all(&conn, &self.catalog, clock::day_key(now), now)
    }

    /// One trigger-engine evaluation pass at the given instant.
    pub fn run_tick(&self, now: DateTime<FixedOffset>) -> Result<TickReport, SchedulerError> {
        let conn = self.lock_db()?;
        engine::tick(&conn, &self.catalog, self.dispatch.as_ref(), now)
    }

    /// Apply an inbound user action at the current instant.
    pub fn handle_action(&self, event: &ActionEvent) -> Result<ActionOutcome, SchedulerError> {
        self.handle_action_at(event, clock::reference_now())
    }

    /// Apply an inbound user action at an explicit instant (tests).
    pub fn handle_action_at(
        &self,
        event: &ActionEvent,
        now: DateTime<FixedOffset>,
    ) -> Result<ActionOutcome, SchedulerError> {
        let conn = self.lock_db()?;
        actions::handle_action(&conn, &self.catalog, self.dispatch.as_ref(), event, now)
    }
}
