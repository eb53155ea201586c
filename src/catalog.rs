//! Schedule catalog — the fixed list of dose slots.
//!
//! Loaded once at startup (embedded default or a JSON file) and validated
//! before anything runs; a bad catalog is fatal because there is no safe
//! default schedule. Slots are identified by stable kebab-case ids — display
//! labels are never used for control flow.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Link to a slot that must be taken first, plus the minimum delay after its
/// `taken_at` before the dependent slot becomes reminder-eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub slot_id: String,
    pub delay_minutes: i64,
}

/// One scheduled medication-taking opportunity: meal + time + drugs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: String,
    pub meal_label: String,
    pub time_of_day: NaiveTime,
    pub drugs: Vec<String>,
    #[serde(default)]
    pub prerequisite: Option<Prerequisite>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    slots: Vec<ScheduleSlot>,
}

/// The validated, immutable slot list shared by all users.
#[derive(Debug, Clone)]
pub struct ScheduleCatalog {
    slots: Vec<ScheduleSlot>,
}

impl ScheduleCatalog {
    /// The catalog embedded in the binary, used when no file is configured.
    pub fn embedded_default() -> Result<Self, CatalogError> {
        Self::from_json(include_str!("../resources/default_catalog.json"))
    }

    /// Load and validate a catalog from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::from_slots(file.slots)
    }

    /// Validate an explicit slot list (the constructor tests use).
    pub fn from_slots(slots: Vec<ScheduleSlot>) -> Result<Self, CatalogError> {
        if slots.is_empty() {
            return Err(CatalogError::Invalid("catalog has no slots".into()));
        }

        let mut ids = HashSet::new();
        for slot in &slots {
            if slot.id.trim().is_empty() {
                return Err(CatalogError::Invalid("slot with empty id".into()));
            }
            if !ids.insert(slot.id.as_str()) {
                return Err(CatalogError::Invalid(format!("duplicate slot id: {}", slot.id)));
            }
        }

        for slot in &slots {
            if let Some(prereq) = &slot.prerequisite {
                if prereq.slot_id == slot.id {
                    return Err(CatalogError::Invalid(format!(
                        "slot {} lists itself as prerequisite",
                        slot.id
                    )));
                }
                if !ids.contains(prereq.slot_id.as_str()) {
                    return Err(CatalogError::Invalid(format!(
                        "slot {} references unknown prerequisite {}",
                        slot.id, prereq.slot_id
                    )));
                }
                if prereq.delay_minutes < 0 {
                    return Err(CatalogError::Invalid(format!(
                        "slot {} has negative prerequisite delay",
                        slot.id
                    )));
                }
            }
        }

        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    pub fn get(&self, slot_id: &str) -> Option<&ScheduleSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
