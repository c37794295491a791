//! WebSocket session handling for document store clients.
//!
//! Each connection starts with a `join`/`peer` handshake. After that the
//! client sends requests and the session answers each one with a reply
//! carrying the same `requestId`. Every `listen` spawns a task that pushes
//! the collection's full contents once immediately and again after each
//! committed change, until `unlisten` or disconnect.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use laundry_time_core::store::{StoreMessage, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;

use super::hub::CollectionChanged;
use super::storage::ServerStorageError;
use super::ServerState;

/// Time a new connection has to send `join`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs one client connection to completion.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sink, mut stream) = socket.split();

    let client_id = match tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut stream)).await {
        Ok(Ok(client_id)) => client_id,
        Ok(Err(message)) => {
            tracing::warn!("Rejecting connection: {}", message);
            let _ = send(&mut sink, &StoreMessage::Error {
                request_id: None,
                message,
            })
            .await;
            return;
        }
        Err(_) => {
            tracing::warn!("Connection did not join in time");
            return;
        }
    };

    let peer = StoreMessage::Peer {
        sender_id: state.peer_id.clone(),
        target_id: client_id.clone(),
    };
    if send(&mut sink, &peer).await.is_err() {
        return;
    }
    tracing::info!("Client {} connected", client_id);

    let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_writer(sink, outgoing_rx));
    let mut session = Session::new(Arc::clone(&state), outgoing);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(data)) => match StoreMessage::decode(&data) {
                Ok(StoreMessage::Leave { .. }) => break,
                Ok(msg) => {
                    if let Some(reply) = session.handle(msg).await {
                        session.reply(reply);
                    }
                }
                Err(e) => {
                    tracing::debug!("Undecodable message from {}: {}", client_id, e);
                    session.reply(StoreMessage::Error {
                        request_id: None,
                        message: format!("Failed to decode message: {}", e),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Ping/pong are answered by the socket; text is not part of the protocol
            }
            Err(e) => {
                tracing::debug!("WebSocket error from {}: {}", client_id, e);
                break;
            }
        }
    }

    // Stops listener tasks and releases the last outgoing sender
    drop(session);
    let _ = writer.await;
    tracing::info!("Client {} disconnected", client_id);
}

/// Waits for the client's `join` and returns its peer id.
async fn await_join<R>(stream: &mut R) -> Result<String, String>
where
    R: StreamExt<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                return match StoreMessage::decode(&data) {
                    Ok(StoreMessage::Join {
                        sender_id,
                        protocol_version,
                    }) => {
                        if protocol_version != PROTOCOL_VERSION {
                            Err(format!(
                                "Unsupported protocol version {} (server speaks {})",
                                protocol_version, PROTOCOL_VERSION
                            ))
                        } else {
                            Ok(sender_id)
                        }
                    }
                    Ok(other) => Err(format!("Expected join, got {:?}", other)),
                    Err(e) => Err(format!("Failed to decode message: {}", e)),
                };
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Err("Connection closed before join".to_string())
}

async fn send<S>(sink: &mut S, msg: &StoreMessage) -> Result<(), String>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let encoded = msg.encode().map_err(|e| e.to_string())?;
    sink.send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn run_writer<S>(mut sink: S, mut outgoing: mpsc::UnboundedReceiver<StoreMessage>)
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = send(&mut sink, &msg).await {
            tracing::debug!("Failed to send to client: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

/// Request handling state for one joined connection.
pub(crate) struct Session {
    state: Arc<ServerState>,
    outgoing: mpsc::UnboundedSender<StoreMessage>,
    listeners: HashMap<u64, JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(state: Arc<ServerState>, outgoing: mpsc::UnboundedSender<StoreMessage>) -> Self {
        Self {
            state,
            outgoing,
            listeners: HashMap::new(),
        }
    }

    fn reply(&self, msg: StoreMessage) {
        let _ = self.outgoing.send(msg);
    }

    /// Handles one request. Returns the direct reply, if the request has one.
    pub(crate) async fn handle(&mut self, msg: StoreMessage) -> Option<StoreMessage> {
        match msg {
            StoreMessage::Listen {
                request_id,
                collection,
            } => {
                self.listen(request_id, collection).await;
                None
            }
            StoreMessage::Unlisten { request_id } => {
                if let Some(listener) = self.listeners.remove(&request_id) {
                    listener.abort();
                }
                None
            }
            StoreMessage::List {
                request_id,
                collection,
            } => Some(match self.state.storage.list(&collection).await {
                Ok(documents) => StoreMessage::Documents {
                    request_id,
                    documents,
                },
                Err(e) => storage_error(request_id, e),
            }),
            StoreMessage::Get {
                request_id,
                collection,
                document_id,
            } => Some(
                match self.state.storage.get(&collection, &document_id).await {
                    Ok(document) => StoreMessage::Document {
                        request_id,
                        document,
                    },
                    Err(e) => storage_error(request_id, e),
                },
            ),
            StoreMessage::Set {
                request_id,
                collection,
                document_id,
                data,
                expected_revision,
            } => Some(
                match self
                    .state
                    .storage
                    .set(&collection, &document_id, &data, expected_revision)
                    .await
                {
                    Ok(revision) => {
                        self.announce(&collection, &document_id, revision).await;
                        StoreMessage::Written {
                            request_id,
                            document_id,
                            revision,
                        }
                    }
                    Err(e) => storage_error(request_id, e),
                },
            ),
            StoreMessage::Add {
                request_id,
                collection,
                data,
            } => Some(match self.state.storage.add(&collection, &data).await {
                Ok(document_id) => {
                    self.announce(&collection, &document_id, 1).await;
                    StoreMessage::Written {
                        request_id,
                        document_id,
                        revision: 1,
                    }
                }
                Err(e) => storage_error(request_id, e),
            }),
            StoreMessage::Join { .. } => Some(StoreMessage::Error {
                request_id: None,
                message: "Already joined".to_string(),
            }),
            other => Some(StoreMessage::Error {
                request_id: other.reply_to(),
                message: format!("Unexpected message: {:?}", other),
            }),
        }
    }

    async fn announce(&self, collection: &str, document_id: &str, revision: u64) {
        tracing::debug!(
            "Committed {}/{} at revision {}",
            collection,
            document_id,
            revision
        );
        self.state
            .hub
            .broadcast(
                collection,
                CollectionChanged {
                    document_id: document_id.to_string(),
                    revision,
                },
            )
            .await;
    }

    /// Starts pushing snapshots of `collection` tagged with `request_id`.
    async fn listen(&mut self, request_id: u64, collection: String) {
        // Subscribe before the first load so no change slips in between
        let mut changes = self.state.hub.subscribe(&collection).await;
        let state = Arc::clone(&self.state);
        let outgoing = self.outgoing.clone();

        let task = tokio::spawn(async move {
            loop {
                match state.storage.list(&collection).await {
                    Ok(documents) => {
                        let snapshot = StoreMessage::Snapshot {
                            request_id,
                            documents,
                        };
                        if outgoing.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to load {} for listener: {}", collection, e);
                        let _ = outgoing.send(storage_error(request_id, e));
                        break;
                    }
                }

                match changes.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        // One reload covers every change queued so far
                        while changes.try_recv().is_ok() {}
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.listeners.insert(request_id, task) {
            previous.abort();
        }
    }

    fn close(&mut self) {
        for (_, listener) in self.listeners.drain() {
            listener.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn storage_error(request_id: u64, e: ServerStorageError) -> StoreMessage {
    match e {
        ServerStorageError::Conflict {
            document_id,
            expected,
        } => StoreMessage::Conflict {
            request_id,
            document_id,
            expected_revision: expected,
        },
        other => {
            tracing::error!("Storage error: {}", other);
            StoreMessage::Error {
                request_id: Some(request_id),
                message: other.to_string(),
            }
        }
    }
}
