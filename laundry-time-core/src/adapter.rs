//! Typed room access on top of a [`DocumentStore`].
//!
//! The adapter is the only code that talks to the store. It turns generic
//! documents into [`Room`] values and back, and absorbs every store failure:
//! callers get an outcome to inspect, never an error to handle.
//!
//! # Machine status writes
//!
//! A status change is a read-modify-write of the whole room document:
//! 1. read the room
//! 2. change the one machine and bump the timestamps
//! 3. write the whole room back
//!
//! With [`WriteConsistency::LastWriteWins`] (the default) step 3 overwrites
//! unconditionally. Two clients changing different machines of the same room
//! at the same time can lose one of the changes: whoever writes last wins at
//! whole-document granularity. [`WriteConsistency::Versioned`] makes step 3
//! conditional on the revision read in step 1 and retries the whole cycle on
//! conflict.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{MachineStatus, Room};
use crate::seed::SeedEntry;
use crate::store::{Document, DocumentStore, StoreError};

/// Collection holding one document per room.
pub const ROOMS_COLLECTION: &str = "laundryRooms";

/// Attempts per status write in versioned mode before giving up on conflicts.
const MAX_CONFLICT_ATTEMPTS: u32 = 5;

/// How the final write of a status change is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConsistency {
    /// Unconditional overwrite. Concurrent writers to one room race.
    #[default]
    LastWriteWins,
    /// Conditional overwrite on the revision that was read.
    Versioned,
}

impl std::fmt::Display for WriteConsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteConsistency::LastWriteWins => write!(f, "last_write_wins"),
            WriteConsistency::Versioned => write!(f, "versioned"),
        }
    }
}

impl std::str::FromStr for WriteConsistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "last_write_wins" => Ok(WriteConsistency::LastWriteWins),
            "versioned" => Ok(WriteConsistency::Versioned),
            _ => Err(format!(
                "Invalid write consistency '{}'. Valid options: last_write_wins, versioned",
                s
            )),
        }
    }
}

/// Retry schedule for transient store failures on writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Errors raised inside the adapter. They never escape it: public operations
/// log them and report them through an outcome.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Failed to decode room {0}: {1}")]
    Decode(String, #[source] serde_json::Error),

    #[error("Failed to encode room {0}: {1}")]
    Encode(String, #[source] serde_json::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Machine {machine_id} not found in room {room_id}")]
    MachineNotFound { room_id: String, machine_id: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`RoomAdapter::write_machine_status`].
#[derive(Debug)]
pub enum WriteOutcome {
    /// The room was written; `revision` is the store's new revision.
    Written { revision: u64 },
    /// Nothing was written. The previous state stands.
    Abandoned(AdapterError),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Result of [`RoomAdapter::seed_if_empty`].
#[derive(Debug)]
pub enum SeedOutcome {
    /// The store was empty and rooms were added.
    Seeded { created: usize, failed: usize },
    /// The store already held documents; nothing was added.
    Skipped { existing: usize },
    /// The emptiness check itself failed; nothing was added.
    Failed(AdapterError),
}

/// A room as read from the store, with the revision it was read at.
#[derive(Debug, Clone)]
pub struct RoomRead {
    pub id: String,
    pub revision: u64,
    pub room: Room,
}

impl RoomRead {
    fn from_document(doc: Document) -> Result<Self, AdapterError> {
        let room =
            Room::from_document(&doc.id, doc.data).map_err(|e| AdapterError::Decode(doc.id.clone(), e))?;
        Ok(Self {
            id: doc.id,
            revision: doc.revision,
            room,
        })
    }

    /// Applies a status change to the local copy.
    pub fn apply_status(
        &mut self,
        machine_id: u32,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> Result<(), AdapterError> {
        if self.room.set_machine_status(machine_id, status, at) {
            Ok(())
        } else {
            Err(AdapterError::MachineNotFound {
                room_id: self.id.clone(),
                machine_id,
            })
        }
    }
}

/// Decodes a collection snapshot into rooms.
///
/// Documents that don't decode are logged and skipped; the rest keep their
/// arrival order.
pub fn decode_rooms(documents: Vec<Document>) -> Vec<Room> {
    documents
        .into_iter()
        .filter_map(|doc| match Room::from_document(&doc.id, doc.data) {
            Ok(room) => Some(room),
            Err(e) => {
                tracing::warn!("Failed to decode room from document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}

/// A standing subscription to the room collection.
///
/// Yields the full list of rooms after every change. Dropping the
/// subscription, or calling [`RoomSubscription::cancel`], closes the
/// underlying store listener.
#[derive(Debug)]
pub struct RoomSubscription {
    receiver: mpsc::UnboundedReceiver<Vec<Room>>,
    task: JoinHandle<()>,
}

impl RoomSubscription {
    /// Waits for the next snapshot. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Vec<Room>> {
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Stream for RoomSubscription {
    type Item = Vec<Room>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Typed access to rooms in a document store.
pub struct RoomAdapter<S> {
    store: Arc<S>,
    consistency: WriteConsistency,
    retry: RetryPolicy,
}

impl<S> Clone for RoomAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            consistency: self.consistency,
            retry: self.retry,
        }
    }
}

impl<S: DocumentStore> RoomAdapter<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            consistency: WriteConsistency::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_consistency(mut self, consistency: WriteConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn consistency(&self) -> WriteConsistency {
        self.consistency
    }

    /// Starts listening to the room collection.
    ///
    /// Returns immediately; snapshots arrive on the subscription. If the
    /// listener can't be registered the failure is logged and the
    /// subscription ends without yielding anything.
    pub fn subscribe(&self) -> RoomSubscription {
        let store = Arc::clone(&self.store);
        let (sender, receiver) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut listener = match store.listen(ROOMS_COLLECTION).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!("Error listening for room updates: {}", e);
                    return;
                }
            };

            while let Some(snapshot) = listener.next().await {
                match snapshot {
                    Ok(documents) => {
                        let total = documents.len();
                        let rooms = decode_rooms(documents);
                        tracing::debug!(
                            "Received update with {} rooms ({} decoded)",
                            total,
                            rooms.len()
                        );
                        if sender.send(rooms).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Room listener ended: {}", e);
                        break;
                    }
                }
            }
        });

        RoomSubscription { receiver, task }
    }

    /// Reads one room (step 1 of a status write).
    pub async fn read_room(&self, room_id: &str) -> Result<RoomRead, AdapterError> {
        let doc = self
            .store
            .get(ROOMS_COLLECTION, room_id)
            .await?
            .ok_or_else(|| AdapterError::RoomNotFound(room_id.to_string()))?;

        RoomRead::from_document(doc)
    }

    /// Writes a room back (step 3 of a status write).
    ///
    /// Unconditional under last-write-wins; conditional on `read.revision`
    /// under versioned consistency.
    pub async fn commit(&self, read: &RoomRead) -> Result<u64, AdapterError> {
        let data = read
            .room
            .to_document()
            .map_err(|e| AdapterError::Encode(read.id.clone(), e))?;

        let expected_revision = match self.consistency {
            WriteConsistency::LastWriteWins => None,
            WriteConsistency::Versioned => Some(read.revision),
        };

        Ok(self
            .store
            .set(ROOMS_COLLECTION, &read.id, data, expected_revision)
            .await?)
    }

    async fn try_write_machine_status(
        &self,
        room_id: &str,
        machine_id: u32,
        status: MachineStatus,
    ) -> Result<u64, AdapterError> {
        let mut read = self.read_room(room_id).await?;
        read.apply_status(machine_id, status, Utc::now())?;
        self.commit(&read).await
    }

    /// Sets one machine's status with a read-modify-write of its room.
    ///
    /// Missing rooms, missing machines and undecodable documents abandon the
    /// write. Transient store failures are retried per the retry policy;
    /// versioned conflicts restart the cycle with a fresh read.
    pub async fn write_machine_status(
        &self,
        room_id: &str,
        machine_id: u32,
        status: MachineStatus,
    ) -> WriteOutcome {
        tracing::info!(
            "Updating machine {} in room {} to status: {}",
            machine_id,
            room_id,
            status
        );

        let mut transport_attempts = 0;
        let mut conflict_attempts = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            match self
                .try_write_machine_status(room_id, machine_id, status)
                .await
            {
                Ok(revision) => {
                    tracing::info!("Updated machine status in room {}", room_id);
                    return WriteOutcome::Written { revision };
                }
                Err(AdapterError::Store(StoreError::Conflict { .. }))
                    if conflict_attempts + 1 < MAX_CONFLICT_ATTEMPTS =>
                {
                    conflict_attempts += 1;
                    tracing::debug!(
                        "Room {} changed since read, retrying ({}/{})",
                        room_id,
                        conflict_attempts,
                        MAX_CONFLICT_ATTEMPTS
                    );
                }
                Err(AdapterError::Store(e))
                    if e.is_transient() && transport_attempts + 1 < self.retry.max_attempts =>
                {
                    transport_attempts += 1;
                    tracing::warn!(
                        "Store unavailable ({}), retrying in {:?}",
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    tracing::warn!("Abandoning status update for room {}: {}", room_id, e);
                    return WriteOutcome::Abandoned(e);
                }
            }
        }
    }

    /// Creates the seed rooms if, and only if, the collection is empty.
    ///
    /// Guards against seeding again on every launch. It does not merge into,
    /// or repair, an existing dataset.
    pub async fn seed_if_empty(&self, seed: &[SeedEntry]) -> SeedOutcome {
        let existing = match self.store.list(ROOMS_COLLECTION).await {
            Ok(documents) => documents.len(),
            Err(e) => {
                tracing::warn!("Error checking database: {}", e);
                return SeedOutcome::Failed(e.into());
            }
        };

        if existing > 0 {
            tracing::info!("Database already contains data, skipping initialization");
            return SeedOutcome::Skipped { existing };
        }

        tracing::info!("Database is empty, initializing with default data...");
        let now = Utc::now();
        let mut created = 0;
        let mut failed = 0;

        for entry in seed {
            let room = entry.to_room(now);
            let data = match room.to_document() {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Error encoding room {}: {}", entry.name, e);
                    failed += 1;
                    continue;
                }
            };

            match self.store.add(ROOMS_COLLECTION, data).await {
                Ok(id) => {
                    tracing::debug!("Initialized room {} as {}", entry.name, id);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!("Error initializing room {}: {}", entry.name, e);
                    failed += 1;
                }
            }
        }

        SeedOutcome::Seeded { created, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MachineType;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn test_hall() -> Vec<SeedEntry> {
        vec![SeedEntry::new("Test Hall", 2, 1)]
    }

    async fn seeded_adapter() -> (RoomAdapter<MemoryStore>, MemoryStore, String) {
        let store = MemoryStore::new();
        let adapter = RoomAdapter::new(store.clone()).with_retry(RetryPolicy::none());
        adapter.seed_if_empty(&test_hall()).await;
        let room_id = store.list(ROOMS_COLLECTION).await.unwrap()[0].id.clone();
        (adapter, store, room_id)
    }

    #[tokio::test]
    async fn test_seed_if_empty_seeds_once() {
        let store = MemoryStore::new();
        let adapter = RoomAdapter::new(store.clone());
        let seed = vec![
            SeedEntry::new("A", 1, 1),
            SeedEntry::new("B", 2, 2),
            SeedEntry::new("C", 0, 3),
        ];

        let first = adapter.seed_if_empty(&seed).await;
        assert!(matches!(
            first,
            SeedOutcome::Seeded {
                created: 3,
                failed: 0
            }
        ));

        let second = adapter.seed_if_empty(&seed).await;
        assert!(matches!(second, SeedOutcome::Skipped { existing: 3 }));

        assert_eq!(store.len(ROOMS_COLLECTION).await, 3);
    }

    #[tokio::test]
    async fn test_seed_skipped_when_any_document_exists() {
        let store = MemoryStore::new();
        store
            .add(ROOMS_COLLECTION, json!({ "unrelated": true }))
            .await
            .unwrap();

        let adapter = RoomAdapter::new(store.clone());
        let outcome = adapter.seed_if_empty(&test_hall()).await;

        assert!(matches!(outcome, SeedOutcome::Skipped { existing: 1 }));
        assert_eq!(store.len(ROOMS_COLLECTION).await, 1);
    }

    #[tokio::test]
    async fn test_seed_when_store_unreachable() {
        let store = MemoryStore::new();
        store.set_offline(true).await;

        let adapter = RoomAdapter::new(store.clone());
        let outcome = adapter.seed_if_empty(&test_hall()).await;
        assert!(matches!(outcome, SeedOutcome::Failed(_)));

        store.set_offline(false).await;
        assert!(store.is_empty(ROOMS_COLLECTION).await);
    }

    #[tokio::test]
    async fn test_seeded_room_layout() {
        let (adapter, _store, room_id) = seeded_adapter().await;

        let read = adapter.read_room(&room_id).await.unwrap();
        assert_eq!(read.room.id.as_deref(), Some(room_id.as_str()));
        assert_eq!(read.room.name, "Test Hall");

        let layout: Vec<(u32, MachineType, MachineStatus)> = read
            .room
            .machines
            .iter()
            .map(|m| (m.id, m.machine_type, m.status))
            .collect();
        assert_eq!(
            layout,
            vec![
                (1, MachineType::Washer, MachineStatus::Available),
                (2, MachineType::Washer, MachineStatus::Available),
                (3, MachineType::Dryer, MachineStatus::Available),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_machine_status() {
        let (adapter, _store, room_id) = seeded_adapter().await;
        let before = adapter.read_room(&room_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = adapter
            .write_machine_status(&room_id, 1, MachineStatus::Occupied)
            .await;
        assert!(matches!(outcome, WriteOutcome::Written { revision: 2 }));

        let after = adapter.read_room(&room_id).await.unwrap();
        let machine = after.room.machine(1).unwrap();
        assert_eq!(machine.status, MachineStatus::Occupied);
        assert!(machine.last_status_update > before.room.machine(1).unwrap().last_status_update);
        assert!(after.room.last_updated > before.room.last_updated);
        assert_eq!(after.room.machine(2), before.room.machine(2));
    }

    #[tokio::test]
    async fn test_write_unknown_room_is_abandoned() {
        let (adapter, store, _room_id) = seeded_adapter().await;
        let before = store.list(ROOMS_COLLECTION).await.unwrap();

        let outcome = adapter
            .write_machine_status("missing", 1, MachineStatus::Occupied)
            .await;
        assert!(matches!(
            outcome,
            WriteOutcome::Abandoned(AdapterError::RoomNotFound(_))
        ));
        assert_eq!(store.list(ROOMS_COLLECTION).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_write_unknown_machine_is_abandoned() {
        let (adapter, store, room_id) = seeded_adapter().await;
        let before = store.list(ROOMS_COLLECTION).await.unwrap();

        let outcome = adapter
            .write_machine_status(&room_id, 42, MachineStatus::Occupied)
            .await;
        assert!(matches!(
            outcome,
            WriteOutcome::Abandoned(AdapterError::MachineNotFound { machine_id: 42, .. })
        ));
        assert_eq!(store.list(ROOMS_COLLECTION).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_write_undecodable_room_is_abandoned() {
        let store = MemoryStore::new();
        let id = store
            .add(ROOMS_COLLECTION, json!({ "name": 5 }))
            .await
            .unwrap();
        let adapter = RoomAdapter::new(store.clone());

        let outcome = adapter
            .write_machine_status(&id, 1, MachineStatus::Occupied)
            .await;
        assert!(matches!(
            outcome,
            WriteOutcome::Abandoned(AdapterError::Decode(_, _))
        ));
    }

    #[tokio::test]
    async fn test_write_while_offline_retries_then_abandons() {
        let (adapter, store, room_id) = seeded_adapter().await;
        let adapter = adapter.with_retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        });
        store.set_offline(true).await;

        let outcome = adapter
            .write_machine_status(&room_id, 1, MachineStatus::Occupied)
            .await;
        assert!(matches!(
            outcome,
            WriteOutcome::Abandoned(AdapterError::Store(StoreError::Transport(_)))
        ));

        store.set_offline(false).await;
        let read = adapter.read_room(&room_id).await.unwrap();
        assert_eq!(read.room.machine(1).unwrap().status, MachineStatus::Available);
    }

    #[tokio::test]
    async fn test_concurrent_writes_last_write_wins() {
        let (adapter, _store, room_id) = seeded_adapter().await;

        // Both writers read before either writes back
        let mut first = adapter.read_room(&room_id).await.unwrap();
        let mut second = adapter.read_room(&room_id).await.unwrap();

        first
            .apply_status(1, MachineStatus::Occupied, Utc::now())
            .unwrap();
        second
            .apply_status(2, MachineStatus::Occupied, Utc::now())
            .unwrap();

        adapter.commit(&first).await.unwrap();
        adapter.commit(&second).await.unwrap();

        // The second write replaced the whole room, dropping machine 1's change
        let room = adapter.read_room(&room_id).await.unwrap().room;
        assert_eq!(room.machine(1).unwrap().status, MachineStatus::Available);
        assert_eq!(room.machine(2).unwrap().status, MachineStatus::Occupied);
    }

    #[tokio::test]
    async fn test_concurrent_writes_versioned_rejects_stale_commit() {
        let (adapter, _store, room_id) = seeded_adapter().await;
        let adapter = adapter.with_consistency(WriteConsistency::Versioned);

        let mut first = adapter.read_room(&room_id).await.unwrap();
        let mut second = adapter.read_room(&room_id).await.unwrap();

        first
            .apply_status(1, MachineStatus::Occupied, Utc::now())
            .unwrap();
        second
            .apply_status(2, MachineStatus::Occupied, Utc::now())
            .unwrap();

        adapter.commit(&first).await.unwrap();
        let err = adapter.commit(&second).await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Store(StoreError::Conflict { .. })
        ));

        // A full write re-reads and keeps both changes
        let outcome = adapter
            .write_machine_status(&room_id, 2, MachineStatus::Occupied)
            .await;
        assert!(outcome.is_written());

        let room = adapter.read_room(&room_id).await.unwrap().room;
        assert_eq!(room.machine(1).unwrap().status, MachineStatus::Occupied);
        assert_eq!(room.machine(2).unwrap().status, MachineStatus::Occupied);
    }

    #[tokio::test]
    async fn test_subscribe_skips_undecodable_documents() {
        let store = MemoryStore::new();
        let adapter = RoomAdapter::new(store.clone());
        adapter.seed_if_empty(&test_hall()).await;
        store
            .add(ROOMS_COLLECTION, json!({ "name": "Broken" }))
            .await
            .unwrap();

        let mut subscription = adapter.subscribe();
        let rooms = subscription.next().await.unwrap();

        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "Test Hall");
    }

    #[tokio::test]
    async fn test_subscribe_delivers_every_change() {
        let store = MemoryStore::new();
        let adapter = RoomAdapter::new(store.clone());

        let mut subscription = adapter.subscribe();
        assert!(subscription.next().await.unwrap().is_empty());

        adapter
            .seed_if_empty(&[SeedEntry::new("A", 1, 0), SeedEntry::new("B", 0, 1)])
            .await;

        assert_eq!(subscription.next().await.unwrap().len(), 1);
        let rooms = subscription.next().await.unwrap();
        let names: Vec<&str> = rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_cancel_closes_listener() {
        let store = MemoryStore::new();
        let adapter = RoomAdapter::new(store.clone());

        let mut subscription = adapter.subscribe();
        subscription.next().await.unwrap();
        assert_eq!(store.listener_count(ROOMS_COLLECTION).await, 1);

        subscription.cancel();
        assert!(subscription.next().await.is_none());
        assert_eq!(store.listener_count(ROOMS_COLLECTION).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_offline_ends_quietly() {
        let store = MemoryStore::new();
        store.set_offline(true).await;

        let mut subscription = RoomAdapter::new(store).subscribe();
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_write_consistency_from_str() {
        assert_eq!(
            "last-write-wins".parse::<WriteConsistency>().unwrap(),
            WriteConsistency::LastWriteWins
        );
        assert_eq!(
            "Versioned".parse::<WriteConsistency>().unwrap(),
            WriteConsistency::Versioned
        );
        assert!("strong".parse::<WriteConsistency>().is_err());
    }
}
