//! Laundry Time Core Library
//!
//! Room and machine model, document store clients and the synchronization
//! controller shared by the Laundry Time applications.

pub mod adapter;
pub mod controller;
pub mod models;
pub mod relative_time;
pub mod seed;
pub mod store;

pub use adapter::{
    decode_rooms, AdapterError, RetryPolicy, RoomAdapter, RoomRead, RoomSubscription, SeedOutcome,
    WriteConsistency, WriteOutcome, ROOMS_COLLECTION,
};
pub use controller::{IntentError, RoomsSnapshot, SyncController};
pub use models::{Machine, MachineStatus, MachineType, Room};
pub use relative_time::{format_relative_time, format_relative_time_from};
pub use seed::{default_seed_data, generate_machines, load_seed_file, SeedEntry, SeedFileError};
pub use store::{
    check_server, Document, DocumentListener, DocumentStore, MemoryStore, RemoteStore, StoreError,
    StoreMessage,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
