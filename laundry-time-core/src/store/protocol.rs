//! Wire protocol for the WebSocket document store.
//!
//! Messages are CBOR-encoded, internally tagged by a `type` field. Field
//! names are camelCase. Every request carries a `requestId` chosen by the
//! client; the matching response echoes it. For `listen`, the request id
//! also names the listener: every `snapshot` it produces carries that id
//! until `unlisten`.
//!
//! Connection lifecycle:
//! 1. Client sends `join` with its peer id
//! 2. Server answers `peer` with its own peer id
//! 3. Requests and pushes flow in both directions
//! 4. Client sends `leave` before closing

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Document;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreMessage {
    /// Client handshake
    #[serde(rename_all = "camelCase")]
    Join {
        sender_id: String,
        protocol_version: String,
    },
    /// Server handshake reply
    #[serde(rename_all = "camelCase")]
    Peer { sender_id: String, target_id: String },
    /// Client is about to disconnect
    #[serde(rename_all = "camelCase")]
    Leave { sender_id: String },

    #[serde(rename_all = "camelCase")]
    Listen { request_id: u64, collection: String },
    #[serde(rename_all = "camelCase")]
    Unlisten { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Get {
        request_id: u64,
        collection: String,
        document_id: String,
    },
    #[serde(rename_all = "camelCase")]
    List { request_id: u64, collection: String },
    #[serde(rename_all = "camelCase")]
    Set {
        request_id: u64,
        collection: String,
        document_id: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_revision: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Add {
        request_id: u64,
        collection: String,
        data: Value,
    },

    /// Full collection contents pushed to a listener
    #[serde(rename_all = "camelCase")]
    Snapshot {
        request_id: u64,
        documents: Vec<Document>,
    },
    /// Reply to `get`
    #[serde(rename_all = "camelCase")]
    Document {
        request_id: u64,
        #[serde(default)]
        document: Option<Document>,
    },
    /// Reply to `list`
    #[serde(rename_all = "camelCase")]
    Documents {
        request_id: u64,
        documents: Vec<Document>,
    },
    /// Reply to `set` and `add`
    #[serde(rename_all = "camelCase")]
    Written {
        request_id: u64,
        document_id: String,
        revision: u64,
    },
    /// Reply to a conditional `set` whose revision no longer matches
    #[serde(rename_all = "camelCase")]
    Conflict {
        request_id: u64,
        document_id: String,
        expected_revision: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        message: String,
    },
}

impl StoreMessage {
    /// Encode message as CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decode message from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(data)
    }

    /// The request id a server reply answers, if any.
    pub fn reply_to(&self) -> Option<u64> {
        match self {
            StoreMessage::Document { request_id, .. }
            | StoreMessage::Documents { request_id, .. }
            | StoreMessage::Written { request_id, .. }
            | StoreMessage::Conflict { request_id, .. } => Some(*request_id),
            StoreMessage::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

/// Generates a random peer id for a connection.
pub fn generate_peer_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
