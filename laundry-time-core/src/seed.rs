//! First-run seed data for an empty store.
//!
//! A seed dataset is a list of rooms with washer and dryer counts. Machines
//! are generated with contiguous ids: washers take `1..=W`, dryers take
//! `W+1..=W+D`. Display code groups machines by type and relies on this
//! ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{Machine, MachineType, Room};

/// One room in a seed dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub name: String,
    pub washers: u32,
    pub dryers: u32,
}

impl SeedEntry {
    pub fn new(name: impl Into<String>, washers: u32, dryers: u32) -> Self {
        Self {
            name: name.into(),
            washers,
            dryers,
        }
    }

    /// Builds the unsaved room for this entry.
    pub fn to_room(&self, at: DateTime<Utc>) -> Room {
        Room::new(
            self.name.clone(),
            generate_machines(self.washers, self.dryers, at),
            at,
        )
    }
}

/// Generates the machine list for a room: all washers, then all dryers.
pub fn generate_machines(washers: u32, dryers: u32, at: DateTime<Utc>) -> Vec<Machine> {
    let washer_ids = 1..=washers;
    let dryer_ids = (washers + 1)..=(washers + dryers);

    washer_ids
        .map(|id| Machine::new(id, MachineType::Washer, at))
        .chain(dryer_ids.map(|id| Machine::new(id, MachineType::Dryer, at)))
        .collect()
}

/// The built-in campus rooms.
pub fn default_seed_data() -> Vec<SeedEntry> {
    [
        ("8th Street West", 22, 26),
        ("Center Street North", 12, 12),
        ("Crecine", 11, 11),
        ("Fitten", 20, 26),
        ("GLC", 15, 14),
        ("Glenn Hall - 3rd Fl", 4, 6),
        ("Glenn Hall - 2nd Fl", 4, 6),
        ("Glenn Hall - 1st Fl", 4, 6),
        ("Glenn Hall - Bsmt", 4, 6),
        ("Glenn Hall - Attic", 1, 1),
        ("Hopkins", 16, 20),
        ("Maulding", 12, 16),
        ("NAA East", 20, 22),
        ("NAA North", 21, 24),
        ("NAA South", 18, 20),
        ("Nelson Shell", 23, 24),
        ("Towers - 1st Fl", 4, 6),
        ("Towers - 2nd Fl", 4, 6),
        ("Towers - Top Fl", 1, 1),
        ("Woodruff South", 12, 12),
    ]
    .into_iter()
    .map(|(name, washers, dryers)| SeedEntry::new(name, washers, dryers))
    .collect()
}

#[derive(Error, Debug)]
pub enum SeedFileError {
    #[error("Failed to read seed file '{}': {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse seed file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
}

/// Loads a seed dataset from a YAML list of `{name, washers, dryers}`.
pub fn load_seed_file(path: &Path) -> Result<Vec<SeedEntry>, SeedFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SeedFileError::Read(path.to_path_buf(), e))?;
    serde_yaml::from_str(&contents).map_err(|e| SeedFileError::Parse(path.to_path_buf(), e))
}
