mod config_cmd;
mod machine;
mod rooms;
mod seed_cmd;
mod status;
mod watch;

pub use config_cmd::ConfigCommand;
pub use machine::{MachineArgs, MachineIntent};
pub use rooms::{RoomsCommand, ShowCommand};
pub use seed_cmd::SeedCommand;
pub use status::StatusCommand;
pub use watch::WatchCommand;

use clap::ValueEnum;
use laundry_time_core::{
    AdapterError, IntentError, RemoteStore, Room, RoomAdapter, SeedFileError, SeedOutcome, StoreError,
    SyncController,
};
use std::time::Duration;

use crate::config::Config;

/// How long a command waits for the store to deliver a snapshot.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Connects to the configured store and starts a controller.
///
/// Returns once seeding has finished and a snapshot holding every seeded
/// room has arrived.
async fn start_controller(config: &Config) -> Result<SyncController<RemoteStore>, CommandError> {
    let seed = config.seed_data()?;
    let store = RemoteStore::connect(&config.server_url.value).await?;
    let adapter = RoomAdapter::new(store).with_consistency(config.write_consistency.value);
    let controller = SyncController::start(adapter, seed);

    let expected = match controller.wait_seeded().await {
        Some(SeedOutcome::Seeded { created, failed }) => {
            if failed > 0 {
                tracing::warn!("{} seed room(s) could not be created", failed);
            }
            created
        }
        _ => 0,
    };

    controller
        .wait_until(SNAPSHOT_TIMEOUT, |s| s.is_loaded() && s.rooms.len() >= expected)
        .await
        .ok_or(CommandError::NoSnapshot)?;

    Ok(controller)
}

/// Finds a room by id, then by name.
fn resolve_room(controller: &SyncController<RemoteStore>, key: &str) -> Result<Room, CommandError> {
    controller
        .room(key)
        .or_else(|| controller.find_room_by_name(key))
        .ok_or_else(|| CommandError::UnknownRoom(key.to_string()))
}

/// Errors from laundry commands
#[derive(Debug)]
pub enum CommandError {
    Store(StoreError),
    SeedFile(SeedFileError),
    Intent(IntentError),
    UnknownRoom(String),
    NoSnapshot,
    Encode(serde_json::Error),
    SeedFailed(AdapterError),
    WriteFailed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Store(e) => write!(f, "{}", e),
            CommandError::SeedFile(e) => write!(f, "{}", e),
            CommandError::Intent(e) => write!(f, "{}", e),
            CommandError::UnknownRoom(key) => write!(f, "No room with id or name '{}'", key),
            CommandError::NoSnapshot => write!(f, "Timed out waiting for room data"),
            CommandError::Encode(e) => write!(f, "Failed to encode room: {}", e),
            CommandError::SeedFailed(e) => write!(f, "Seeding failed: {}", e),
            CommandError::WriteFailed(e) => write!(f, "Update failed: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Store(e) => Some(e),
            CommandError::SeedFile(e) => Some(e),
            CommandError::Intent(e) => Some(e),
            CommandError::Encode(e) => Some(e),
            CommandError::SeedFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

impl From<SeedFileError> for CommandError {
    fn from(e: SeedFileError) -> Self {
        CommandError::SeedFile(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Encode(e)
    }
}

impl From<IntentError> for CommandError {
    fn from(e: IntentError) -> Self {
        CommandError::Intent(e)
    }
}
