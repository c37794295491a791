use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Washer,
    Dryer,
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::Washer => write!(f, "washer"),
            MachineType::Dryer => write!(f, "dryer"),
        }
    }
}

/// Status of a single machine as reported by users.
///
/// There is no expiry: a machine reported occupied stays occupied until
/// someone flips it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MachineStatus {
    Available,
    Occupied,
    OutOfOrder,
}

impl MachineStatus {
    /// Status after a tap on the machine.
    ///
    /// Available and occupied flip into each other. Out-of-order machines
    /// can't be toggled and return `None`.
    pub fn toggled(self) -> Option<MachineStatus> {
        match self {
            MachineStatus::Available => Some(MachineStatus::Occupied),
            MachineStatus::Occupied => Some(MachineStatus::Available),
            MachineStatus::OutOfOrder => None,
        }
    }

    pub fn is_working(self) -> bool {
        self != MachineStatus::OutOfOrder
    }

    /// Human-readable label, e.g. "Out of Order".
    pub fn label(self) -> &'static str {
        match self {
            MachineStatus::Available => "Available",
            MachineStatus::Occupied => "Occupied",
            MachineStatus::OutOfOrder => "Out of Order",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineStatus::Available => write!(f, "available"),
            MachineStatus::Occupied => write!(f, "occupied"),
            MachineStatus::OutOfOrder => write!(f, "outOfOrder"),
        }
    }
}

impl FromStr for MachineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "available" => Ok(MachineStatus::Available),
            "occupied" => Ok(MachineStatus::Occupied),
            "outoforder" => Ok(MachineStatus::OutOfOrder),
            _ => Err(format!(
                "Invalid machine status '{}'. Valid options: available, occupied, out-of-order",
                s
            )),
        }
    }
}

/// A washer or dryer inside a room.
///
/// `id` is only unique within the owning room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: u32,
    #[serde(rename = "type")]
    pub machine_type: MachineType,
    pub status: MachineStatus,
    pub last_status_update: DateTime<Utc>,
}

impl Machine {
    pub fn new(id: u32, machine_type: MachineType, at: DateTime<Utc>) -> Self {
        Self {
            id,
            machine_type,
            status: MachineStatus::Available,
            last_status_update: at,
        }
    }

    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = status;
        self
    }
}
