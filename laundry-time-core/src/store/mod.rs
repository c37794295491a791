//! Generic collection-of-documents store.
//!
//! A store holds named collections of JSON documents. Each document has a
//! store-assigned id and a revision the store bumps on every write. Listeners
//! receive the full current contents of a collection on registration and
//! again after every change.
//!
//! Two implementations exist:
//! - [`MemoryStore`]: in-process, used in tests and for offline runs
//! - [`RemoteStore`]: WebSocket client for the `laundrytime-server` store

mod document_id;
mod memory;
mod protocol;
mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use document_id::{generate_document_id, DOCUMENT_ID_LEN};
pub use memory::MemoryStore;
pub use protocol::{generate_peer_id, StoreMessage, PROTOCOL_VERSION};
pub use remote::{check_server, RemoteStore};

/// A stored document as delivered by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub revision: u64,
    pub data: Value,
}

/// Errors returned by document store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("CBOR error: {0}")]
    Codec(String),

    #[error("Write conflict on document {document_id}: expected revision {expected}")]
    Conflict { document_id: String, expected: u64 },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}

impl StoreError {
    /// True for failures where trying again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Transport(_) | StoreError::Timeout | StoreError::Closed
        )
    }
}

/// A standing listener on one collection.
///
/// Yields a full snapshot per change. An `Err` item reports that the listener
/// broke (e.g. the connection dropped); the stream ends after it.
#[derive(Debug)]
pub struct DocumentListener {
    receiver: mpsc::UnboundedReceiver<Result<Vec<Document>, StoreError>>,
}

impl DocumentListener {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Result<Vec<Document>, StoreError>>,
    ) -> Self {
        Self { receiver }
    }

    /// Waits for the next snapshot. Returns `None` once the listener is closed.
    pub async fn next(&mut self) -> Option<Result<Vec<Document>, StoreError>> {
        self.receiver.recv().await
    }
}

pub(crate) type ListenerSender = mpsc::UnboundedSender<Result<Vec<Document>, StoreError>>;

/// Operations every document store provides.
///
/// `set` with `expected_revision: Some(r)` is a conditional write that fails
/// with [`StoreError::Conflict`] unless the stored revision is still `r`.
/// With `None` it overwrites unconditionally (last write wins).
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// All documents of a collection, in insertion order.
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// A single document, or `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Writes a whole document, returning its new revision.
    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Creates a document with a store-assigned id, returning the id.
    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    /// Registers a listener on a collection.
    async fn listen(&self, collection: &str) -> Result<DocumentListener, StoreError>;
}
