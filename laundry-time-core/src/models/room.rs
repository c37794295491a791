use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::machine::{Machine, MachineStatus, MachineType};

/// A physical laundry room and the machines inside it.
///
/// The room owns its machine list outright; machines are never shared or
/// referenced from outside the room. `id` is the store-assigned document id
/// and is `None` until the room has been persisted. It is not part of the
/// stored document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(skip)]
    pub id: Option<String>,
    pub name: String,
    pub machines: Vec<Machine>,
    pub last_updated: DateTime<Utc>,
}

impl Room {
    pub fn new(
        name: impl Into<String>,
        machines: Vec<Machine>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            machines,
            last_updated,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Decodes a stored document body, binding the document id to the room.
    pub fn from_document(id: &str, data: Value) -> Result<Self, serde_json::Error> {
        let room: Room = serde_json::from_value(data)?;
        Ok(room.with_id(id))
    }

    /// Encodes the room as a document body. The id is left out.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn machine(&self, machine_id: u32) -> Option<&Machine> {
        self.machines.iter().find(|m| m.id == machine_id)
    }

    /// Sets one machine's status and bumps both timestamps.
    ///
    /// `lastUpdated` never moves backwards. Returns false if the room has no
    /// machine with that id.
    pub fn set_machine_status(
        &mut self,
        machine_id: u32,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(machine) = self.machines.iter_mut().find(|m| m.id == machine_id) else {
            return false;
        };

        machine.status = status;
        machine.last_status_update = at;
        self.last_updated = self.last_updated.max(at);
        true
    }

    pub fn machines_of_type(&self, machine_type: MachineType) -> impl Iterator<Item = &Machine> {
        self.machines
            .iter()
            .filter(move |m| m.machine_type == machine_type)
    }

    pub fn washers(&self) -> impl Iterator<Item = &Machine> {
        self.machines_of_type(MachineType::Washer)
    }

    pub fn dryers(&self) -> impl Iterator<Item = &Machine> {
        self.machines_of_type(MachineType::Dryer)
    }

    /// Number of machines of a type currently available.
    pub fn available(&self, machine_type: MachineType) -> usize {
        self.machines_of_type(machine_type)
            .filter(|m| m.status == MachineStatus::Available)
            .count()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;
        writeln!(
            f,
            "Washers: {}/{} available",
            self.available(MachineType::Washer),
            self.washers().count()
        )?;
        writeln!(
            f,
            "Dryers:  {}/{} available",
            self.available(MachineType::Dryer),
            self.dryers().count()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_room() -> Room {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).unwrap();
        Room::new(
            "Preview Room",
            vec![
                Machine::new(1, MachineType::Washer, at),
                Machine::new(2, MachineType::Washer, at).with_status(MachineStatus::Occupied),
                Machine::new(3, MachineType::Dryer, at).with_status(MachineStatus::OutOfOrder),
            ],
            at,
        )
    }

    #[test]
    fn test_document_roundtrip() {
        let room = sample_room().with_id("abc123");

        let data = room.to_document().unwrap();
        let parsed = Room::from_document("abc123", data).unwrap();

        assert_eq!(parsed, room);
    }

    #[test]
    fn test_document_body_has_no_id() {
        let room = sample_room().with_id("abc123");
        let data = room.to_document().unwrap();

        assert!(data.get("id").is_none());
        assert_eq!(data["name"], "Preview Room");
        assert!(data.get("lastUpdated").is_some());
        assert_eq!(data["machines"][2]["status"], "outOfOrder");
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let data = serde_json::json!({ "name": "Broken", "machines": "none" });
        assert!(Room::from_document("x", data).is_err());
    }

    #[test]
    fn test_set_machine_status_bumps_timestamps() {
        let mut room = sample_room();
        let later = room.last_updated + Duration::minutes(5);

        assert!(room.set_machine_status(1, MachineStatus::Occupied, later));

        let machine = room.machine(1).unwrap();
        assert_eq!(machine.status, MachineStatus::Occupied);
        assert_eq!(machine.last_status_update, later);
        assert_eq!(room.last_updated, later);
    }

    #[test]
    fn test_set_machine_status_never_moves_last_updated_back() {
        let mut room = sample_room();
        let before = room.last_updated;
        let earlier = before - Duration::hours(1);

        assert!(room.set_machine_status(2, MachineStatus::Available, earlier));
        assert_eq!(room.last_updated, before);
    }

    #[test]
    fn test_set_machine_status_unknown_machine() {
        let mut room = sample_room();
        let original = room.clone();

        assert!(!room.set_machine_status(99, MachineStatus::Occupied, Utc::now()));
        assert_eq!(room, original);
    }

    #[test]
    fn test_grouping_and_availability() {
        let room = sample_room();

        assert_eq!(room.washers().count(), 2);
        assert_eq!(room.dryers().count(), 1);
        assert_eq!(room.available(MachineType::Washer), 1);
        assert_eq!(room.available(MachineType::Dryer), 0);
    }

    #[test]
    fn test_room_display() {
        let output = format!("{}", sample_room());
        assert!(output.contains("Preview Room"));
        assert!(output.contains("Washers: 1/2 available"));
        assert!(output.contains("Dryers:  0/1 available"));
    }
}
