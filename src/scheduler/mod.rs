pub mod actions;
pub mod engine;
pub mod initializer;
pub mod state;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Unknown schedule slot: {0}")]
    UnknownSlot(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}
