//! Client-side synchronization controller.
//!
//! Owns the locally observed list of rooms. A single pump task applies every
//! snapshot from the room subscription, replacing the whole list at once, so
//! readers never see a half-applied update. Status changes go straight to the
//! store without touching local state; the new state arrives back through the
//! subscription like any other remote change.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::adapter::{RoomAdapter, SeedOutcome, WriteOutcome};
use crate::models::{MachineStatus, Room};
use crate::relative_time;
use crate::seed::SeedEntry;
use crate::store::DocumentStore;

/// The observable room list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomsSnapshot {
    /// Number of snapshots applied so far. Zero until the first delivery.
    pub generation: u64,
    /// Rooms in store order.
    pub rooms: Vec<Room>,
}

impl RoomsSnapshot {
    pub fn is_loaded(&self) -> bool {
        self.generation > 0
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id.as_deref() == Some(room_id))
    }
}

/// A status change rejected before it reached the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Machine {machine_id} not found in room {room_id}")]
    MachineNotFound { room_id: String, machine_id: u32 },

    #[error("Cannot {action} machine {machine_id}: it is {status}")]
    InvalidTransition {
        machine_id: u32,
        status: MachineStatus,
        action: &'static str,
    },
}

/// Keeps a local view of all rooms in sync with the store.
pub struct SyncController<S: DocumentStore> {
    adapter: RoomAdapter<S>,
    state: watch::Receiver<RoomsSnapshot>,
    pump: JoinHandle<()>,
    seeding: Mutex<Option<JoinHandle<SeedOutcome>>>,
}

impl<S: DocumentStore> SyncController<S> {
    /// Starts the controller.
    ///
    /// Kicks off seeding (not awaited) and the room subscription. The room
    /// list starts empty and fills in with the first snapshot. Seeding and the
    /// subscription are independent: the initial snapshot may arrive before,
    /// during, or after seeding. An empty `seed` skips seeding.
    pub fn start(adapter: RoomAdapter<S>, seed: Vec<SeedEntry>) -> Self {
        let seeding = if seed.is_empty() {
            None
        } else {
            let seeder = adapter.clone();
            Some(tokio::spawn(async move { seeder.seed_if_empty(&seed).await }))
        };

        let mut subscription = adapter.subscribe();
        let (sender, state) = watch::channel(RoomsSnapshot::default());

        let pump = tokio::spawn(async move {
            while let Some(rooms) = subscription.next().await {
                sender.send_modify(|snapshot| {
                    snapshot.generation += 1;
                    snapshot.rooms = rooms;
                });
            }
            tracing::debug!("Room subscription ended");
        });

        Self {
            adapter,
            state,
            pump,
            seeding: Mutex::new(seeding),
        }
    }

    /// Waits for the seeding kicked off by [`SyncController::start`].
    ///
    /// `None` if nothing was seeded or the outcome was already taken.
    pub async fn wait_seeded(&self) -> Option<SeedOutcome> {
        let handle = self.seeding.lock().await.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!("Seeding task failed: {}", e);
                None
            }
        }
    }

    pub fn adapter(&self) -> &RoomAdapter<S> {
        &self.adapter
    }

    /// Current room list.
    pub fn rooms(&self) -> Vec<Room> {
        self.state.borrow().rooms.clone()
    }

    pub fn snapshot(&self) -> RoomsSnapshot {
        self.state.borrow().clone()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.state.borrow().room(room_id).cloned()
    }

    /// Finds a room by exact name, falling back to a case-insensitive match.
    pub fn find_room_by_name(&self, name: &str) -> Option<Room> {
        let state = self.state.borrow();
        state
            .rooms
            .iter()
            .find(|r| r.name == name)
            .or_else(|| state.rooms.iter().find(|r| r.name.eq_ignore_ascii_case(name)))
            .cloned()
    }

    /// A receiver notified whenever the room list is replaced.
    pub fn watch(&self) -> watch::Receiver<RoomsSnapshot> {
        self.state.clone()
    }

    /// Waits until the room list satisfies `condition`, up to `timeout`.
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> Option<RoomsSnapshot>
    where
        F: FnMut(&RoomsSnapshot) -> bool,
    {
        let mut state = self.state.clone();
        let result = match tokio::time::timeout(timeout, state.wait_for(condition)).await {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        };
        result
    }

    /// Waits for the first snapshot, up to `timeout`.
    pub async fn wait_loaded(&self, timeout: Duration) -> Option<RoomsSnapshot> {
        self.wait_until(timeout, RoomsSnapshot::is_loaded).await
    }

    /// Asks the store to set a machine's status.
    ///
    /// Returns at once. Local state is not touched; the change shows up when
    /// the store echoes it back. Awaiting the handle is optional.
    pub fn request_machine_status_change(
        &self,
        room_id: &str,
        machine_id: u32,
        status: MachineStatus,
    ) -> JoinHandle<WriteOutcome> {
        let adapter = self.adapter.clone();
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            adapter
                .write_machine_status(&room_id, machine_id, status)
                .await
        })
    }

    fn current_status(&self, room_id: &str, machine_id: u32) -> Result<MachineStatus, IntentError> {
        let state = self.state.borrow();
        let room = state
            .room(room_id)
            .ok_or_else(|| IntentError::RoomNotFound(room_id.to_string()))?;
        room.machine(machine_id)
            .map(|m| m.status)
            .ok_or_else(|| IntentError::MachineNotFound {
                room_id: room_id.to_string(),
                machine_id,
            })
    }

    /// Flips a machine between available and occupied.
    ///
    /// Out-of-order machines can't be toggled.
    pub fn toggle_machine(
        &self,
        room_id: &str,
        machine_id: u32,
    ) -> Result<JoinHandle<WriteOutcome>, IntentError> {
        let status = self.current_status(room_id, machine_id)?;
        let next = status.toggled().ok_or(IntentError::InvalidTransition {
            machine_id,
            status,
            action: "toggle",
        })?;
        Ok(self.request_machine_status_change(room_id, machine_id, next))
    }

    pub fn mark_out_of_order(
        &self,
        room_id: &str,
        machine_id: u32,
    ) -> Result<JoinHandle<WriteOutcome>, IntentError> {
        let status = self.current_status(room_id, machine_id)?;
        if !status.is_working() {
            return Err(IntentError::InvalidTransition {
                machine_id,
                status,
                action: "mark out of order",
            });
        }
        Ok(self.request_machine_status_change(room_id, machine_id, MachineStatus::OutOfOrder))
    }

    /// Returns an out-of-order machine to service as available.
    pub fn mark_working(
        &self,
        room_id: &str,
        machine_id: u32,
    ) -> Result<JoinHandle<WriteOutcome>, IntentError> {
        let status = self.current_status(room_id, machine_id)?;
        if status.is_working() {
            return Err(IntentError::InvalidTransition {
                machine_id,
                status,
                action: "mark working",
            });
        }
        Ok(self.request_machine_status_change(room_id, machine_id, MachineStatus::Available))
    }

    pub fn format_relative_time(&self, timestamp: DateTime<Utc>) -> String {
        relative_time::format_relative_time(timestamp)
    }

    /// Stops applying snapshots and closes the subscription.
    pub fn shutdown(&self) {
        self.pump.abort();
    }
}

impl<S: DocumentStore> Drop for SyncController<S> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ROOMS_COLLECTION;
    use crate::models::MachineType;
    use crate::store::MemoryStore;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_hall() -> Vec<SeedEntry> {
        vec![SeedEntry::new("Test Hall", 2, 1)]
    }

    async fn started(seed: Vec<SeedEntry>) -> (SyncController<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        let controller = SyncController::start(RoomAdapter::new(store.clone()), seed);
        (controller, store)
    }

    #[tokio::test]
    async fn test_starts_empty_then_receives_seeded_rooms() {
        let (controller, _store) = started(test_hall()).await;
        assert!(controller.rooms().is_empty());

        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();
        let room = &snapshot.rooms[0];
        assert_eq!(room.name, "Test Hall");
        assert_eq!(room.washers().count(), 2);
        assert_eq!(room.dryers().count(), 1);
        assert!(room
            .machines
            .iter()
            .all(|m| m.status == MachineStatus::Available));
    }

    #[tokio::test]
    async fn test_wait_seeded_reports_every_entry() {
        let seed = vec![
            SeedEntry::new("North", 2, 2),
            SeedEntry::new("South", 1, 1),
            SeedEntry::new("East", 3, 0),
        ];
        let (controller, store) = started(seed).await;

        let outcome = controller.wait_seeded().await.unwrap();
        assert!(matches!(
            outcome,
            SeedOutcome::Seeded {
                created: 3,
                failed: 0
            }
        ));
        assert_eq!(store.len(ROOMS_COLLECTION).await, 3);
        assert!(controller.wait_seeded().await.is_none());

        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 3)
            .await
            .unwrap();
        let names: Vec<&str> = snapshot.rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["North", "South", "East"]);
    }

    #[tokio::test]
    async fn test_empty_seed_skips_seeding() {
        let (controller, store) = started(Vec::new()).await;

        assert!(controller.wait_seeded().await.is_none());
        let snapshot = controller.wait_loaded(WAIT).await.unwrap();
        assert!(snapshot.rooms.is_empty());
        assert!(store.is_empty(ROOMS_COLLECTION).await);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let (controller, _store) = started(Vec::new()).await;
        let snapshot = controller
            .wait_until(Duration::from_millis(50), |s| s.rooms.len() == 5)
            .await;
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn test_second_client_does_not_reseed() {
        let store = MemoryStore::new();
        let first = SyncController::start(RoomAdapter::new(store.clone()), test_hall());
        first.wait_until(WAIT, |s| s.rooms.len() == 1).await.unwrap();

        let second = SyncController::start(RoomAdapter::new(store.clone()), test_hall());
        let snapshot = second.wait_loaded(WAIT).await.unwrap();
        assert_eq!(snapshot.rooms.len(), 1);

        assert!(matches!(
            second.wait_seeded().await,
            Some(SeedOutcome::Skipped { existing: 1 })
        ));
        assert_eq!(store.len(ROOMS_COLLECTION).await, 1);
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let (controller, _store) = started(test_hall()).await;
        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();
        let room = snapshot.rooms[0].clone();
        let room_id = room.id.clone().unwrap();
        let before = room.machine(1).unwrap().last_status_update;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = controller.toggle_machine(&room_id, 1).unwrap().await.unwrap();
        assert!(outcome.is_written());

        let snapshot = controller
            .wait_until(WAIT, |s| {
                s.room(&room_id).and_then(|r| r.machine(1)).map(|m| m.status)
                    == Some(MachineStatus::Occupied)
            })
            .await
            .unwrap();
        let updated = snapshot.room(&room_id).unwrap();
        assert!(updated.machine(1).unwrap().last_status_update > before);
        assert_eq!(updated.available(MachineType::Washer), 1);

        controller.toggle_machine(&room_id, 1).unwrap().await.unwrap();
        controller
            .wait_until(WAIT, |s| {
                s.room(&room_id).map(|r| r.available(MachineType::Washer)) == Some(2)
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_not_toggleable() {
        let (controller, _store) = started(test_hall()).await;
        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();
        let room_id = snapshot.rooms[0].id.clone().unwrap();

        controller
            .mark_out_of_order(&room_id, 3)
            .unwrap()
            .await
            .unwrap();
        let snapshot = controller
            .wait_until(WAIT, |s| {
                s.room(&room_id).and_then(|r| r.machine(3)).map(|m| m.status)
                    == Some(MachineStatus::OutOfOrder)
            })
            .await
            .unwrap();
        assert_eq!(
            snapshot
                .room(&room_id)
                .unwrap()
                .available(MachineType::Dryer),
            0
        );

        let err = controller.toggle_machine(&room_id, 3).unwrap_err();
        assert!(matches!(
            err,
            IntentError::InvalidTransition {
                machine_id: 3,
                status: MachineStatus::OutOfOrder,
                ..
            }
        ));
        assert!(controller.mark_out_of_order(&room_id, 3).is_err());

        controller.mark_working(&room_id, 3).unwrap().await.unwrap();
        controller
            .wait_until(WAIT, |s| {
                s.room(&room_id).and_then(|r| r.machine(3)).map(|m| m.status)
                    == Some(MachineStatus::Available)
            })
            .await
            .unwrap();
        assert!(controller.mark_working(&room_id, 3).is_err());
    }

    #[tokio::test]
    async fn test_unknown_targets_rejected() {
        let (controller, _store) = started(test_hall()).await;
        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();
        let room_id = snapshot.rooms[0].id.clone().unwrap();

        assert_eq!(
            controller.toggle_machine("nope", 1).unwrap_err(),
            IntentError::RoomNotFound("nope".to_string())
        );
        assert!(matches!(
            controller.toggle_machine(&room_id, 9).unwrap_err(),
            IntentError::MachineNotFound { machine_id: 9, .. }
        ));
    }

    #[tokio::test]
    async fn test_write_while_offline_changes_nothing() {
        let (controller, store) = started(test_hall()).await;
        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();
        let room_id = snapshot.rooms[0].id.clone().unwrap();

        store.set_offline(true).await;
        let outcome = controller
            .request_machine_status_change(&room_id, 1, MachineStatus::Occupied)
            .await
            .unwrap();
        assert!(!outcome.is_written());
        store.set_offline(false).await;

        assert_eq!(controller.snapshot(), snapshot);
        let stored = controller
            .adapter()
            .read_room(&room_id)
            .await
            .unwrap()
            .room;
        assert_eq!(stored.machine(1).unwrap().status, MachineStatus::Available);
    }

    #[tokio::test]
    async fn test_remote_change_replaces_list() {
        let (controller, store) = started(test_hall()).await;
        controller
            .wait_until(WAIT, |s| s.rooms.len() == 1)
            .await
            .unwrap();

        // Another client adds a room directly
        let other = RoomAdapter::new(store.clone());
        let room = SeedEntry::new("Annex", 1, 1).to_room(Utc::now());
        other
            .store()
            .add(ROOMS_COLLECTION, room.to_document().unwrap())
            .await
            .unwrap();

        let snapshot = controller
            .wait_until(WAIT, |s| s.rooms.len() == 2)
            .await
            .unwrap();
        assert!(snapshot.generation >= 2);
        assert!(controller.find_room_by_name("annex").is_some());
        assert!(controller.find_room_by_name("Basement").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_updates() {
        let (controller, store) = started(Vec::new()).await;
        controller.wait_loaded(WAIT).await.unwrap();
        assert_eq!(store.listener_count(ROOMS_COLLECTION).await, 1);

        controller.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.listener_count(ROOMS_COLLECTION).await, 0);
        assert!(controller.rooms().is_empty());
    }
}
