//! WebSocket client for the Laundry Time document store server.
//!
//! One connection carries every request and every listener. A writer task
//! drains an outgoing queue into the socket; a reader task routes replies to
//! the waiting request by `requestId` and pushes snapshots to listeners.
//! When the connection drops, pending requests fail with
//! [`StoreError::Closed`] and every listener receives a final error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::protocol::{generate_peer_id, StoreMessage, PROTOCOL_VERSION};
use super::{Document, DocumentListener, DocumentStore, ListenerSender, StoreError};

/// Timeout for handshake completion.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single request/reply round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

struct Shared {
    peer_id: String,
    server_peer_id: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, oneshot::Sender<StoreMessage>>>,
    listeners: Mutex<HashMap<u64, ListenerSender>>,
    next_request_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn send(&self, msg: &StoreMessage) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let encoded = msg.encode().map_err(|e| StoreError::Codec(e.to_string()))?;
        self.outgoing
            .send(Message::Binary(encoded.into()))
            .map_err(|_| StoreError::Closed)
    }

    /// Routes one decoded server message.
    async fn dispatch(&self, msg: StoreMessage) {
        match msg {
            StoreMessage::Snapshot {
                request_id,
                documents,
            } => {
                let mut listeners = self.listeners.lock().await;
                let delivered = listeners
                    .get(&request_id)
                    .map(|listener| listener.send(Ok(documents)).is_ok())
                    .unwrap_or(false);

                if !delivered && listeners.remove(&request_id).is_some() {
                    tracing::debug!("Listener {} dropped, unlistening", request_id);
                    let _ = self.send(&StoreMessage::Unlisten { request_id });
                }
            }
            StoreMessage::Error {
                request_id: None,
                message,
            } => {
                tracing::warn!("Store error: {}", message);
            }
            reply => match reply.reply_to() {
                Some(request_id) => {
                    if let Some(waiter) = self.pending.lock().await.remove(&request_id) {
                        let _ = waiter.send(reply);
                    } else {
                        tracing::debug!("Reply for unknown request {}", request_id);
                    }
                }
                None => {
                    tracing::debug!("Ignoring unexpected message: {:?}", reply);
                }
            },
        }
    }

    /// Fails everything still waiting on the connection.
    async fn shut_down(&self, reason: StoreError) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().await.clear();

        for (_, listener) in self.listeners.lock().await.drain() {
            let _ = listener.send(Err(reason.clone()));
        }
    }
}

/// Document store reached over a WebSocket connection.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct RemoteStore {
    shared: Arc<Shared>,
}

impl RemoteStore {
    /// Connects and performs the handshake.
    pub async fn connect(server_url: &str) -> Result<Self, StoreError> {
        let ws_url = build_ws_url(server_url);
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let (mut sender, mut receiver) = ws_stream.split();

        let peer_id = generate_peer_id();
        let server_peer_id = perform_handshake(&mut sender, &mut receiver, &peer_id).await?;
        tracing::debug!("Connected to {} as {}", ws_url, peer_id);

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            peer_id,
            server_peer_id,
            outgoing,
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(run_writer(sender, outgoing_rx));
        tokio::spawn(run_reader(receiver, Arc::clone(&shared)));

        Ok(Self { shared })
    }

    /// The server's peer id, learned during the handshake.
    pub fn server_peer_id(&self) -> &str {
        &self.shared.server_peer_id
    }

    /// Sends `leave` and closes the connection.
    pub fn close(&self) {
        let _ = self.shared.send(&StoreMessage::Leave {
            sender_id: self.shared.peer_id.clone(),
        });
        let _ = self.shared.outgoing.send(Message::Close(None));
    }

    fn next_request_id(&self) -> u64 {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a request and waits for the reply carrying the same id.
    async fn request(
        &self,
        msg: StoreMessage,
        request_id: u64,
    ) -> Result<StoreMessage, StoreError> {
        let (waiter, reply) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, waiter);

        if let Err(e) = self.shared.send(&msg) {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(REQUEST_TIMEOUT, reply).await {
            Ok(Ok(StoreMessage::Error { message, .. })) => Err(StoreError::Rejected(message)),
            Ok(Ok(StoreMessage::Conflict {
                document_id,
                expected_revision,
                ..
            })) => Err(StoreError::Conflict {
                document_id,
                expected: expected_revision,
            }),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                Err(StoreError::Timeout)
            }
        }
    }
}

fn unexpected(reply: StoreMessage) -> StoreError {
    StoreError::Protocol(format!("Unexpected reply: {:?}", reply))
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let request_id = self.next_request_id();
        let msg = StoreMessage::List {
            request_id,
            collection: collection.to_string(),
        };

        match self.request(msg, request_id).await? {
            StoreMessage::Documents { documents, .. } => Ok(documents),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let request_id = self.next_request_id();
        let msg = StoreMessage::Get {
            request_id,
            collection: collection.to_string(),
            document_id: id.to_string(),
        };

        match self.request(msg, request_id).await? {
            StoreMessage::Document { document, .. } => Ok(document),
            other => Err(unexpected(other)),
        }
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        let request_id = self.next_request_id();
        let msg = StoreMessage::Set {
            request_id,
            collection: collection.to_string(),
            document_id: id.to_string(),
            data,
            expected_revision,
        };

        match self.request(msg, request_id).await? {
            StoreMessage::Written { revision, .. } => Ok(revision),
            other => Err(unexpected(other)),
        }
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let request_id = self.next_request_id();
        let msg = StoreMessage::Add {
            request_id,
            collection: collection.to_string(),
            data,
        };

        match self.request(msg, request_id).await? {
            StoreMessage::Written { document_id, .. } => Ok(document_id),
            other => Err(unexpected(other)),
        }
    }

    async fn listen(&self, collection: &str) -> Result<DocumentListener, StoreError> {
        let request_id = self.next_request_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.listeners.lock().await.insert(request_id, sender);

        let msg = StoreMessage::Listen {
            request_id,
            collection: collection.to_string(),
        };
        if let Err(e) = self.shared.send(&msg) {
            self.shared.listeners.lock().await.remove(&request_id);
            return Err(e);
        }

        Ok(DocumentListener::new(receiver))
    }
}

/// Performs the handshake with the server.
///
/// Sends a `join` message and waits for a `peer` response.
async fn perform_handshake<S, R>(
    sender: &mut S,
    receiver: &mut R,
    peer_id: &str,
) -> Result<String, StoreError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let join_msg = StoreMessage::Join {
        sender_id: peer_id.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
    };

    let encoded = join_msg
        .encode()
        .map_err(|e| StoreError::Codec(e.to_string()))?;

    sender
        .send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;

    let peer_response = timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(msg_result) = receiver.next().await {
            match msg_result {
                Ok(Message::Binary(data)) => {
                    let msg = StoreMessage::decode(&data)
                        .map_err(|e| StoreError::Codec(e.to_string()))?;

                    return match msg {
                        StoreMessage::Peer {
                            sender_id,
                            target_id,
                        } => {
                            if target_id != peer_id {
                                Err(StoreError::Protocol(
                                    "Peer response target_id mismatch".to_string(),
                                ))
                            } else {
                                Ok(sender_id)
                            }
                        }
                        StoreMessage::Error { message, .. } => Err(StoreError::Rejected(message)),
                        other => Err(StoreError::Protocol(format!(
                            "Unexpected message during handshake: {:?}",
                            other
                        ))),
                    };
                }
                Ok(Message::Close(_)) => {
                    return Err(StoreError::Protocol(
                        "Server closed connection during handshake".to_string(),
                    ));
                }
                Ok(_) => {
                    // Ignore other message types
                }
                Err(e) => {
                    return Err(StoreError::Transport(e.to_string()));
                }
            }
        }
        Err(StoreError::Closed)
    })
    .await;

    match peer_response {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

async fn run_writer<S>(mut sink: S, mut outgoing: mpsc::UnboundedReceiver<Message>)
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::warn!("WebSocket send failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn run_reader<R>(mut receiver: R, shared: Arc<Shared>)
where
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let reason = loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => match StoreMessage::decode(&data) {
                Ok(msg) => shared.dispatch(msg).await,
                Err(e) => tracing::warn!("Dropping undecodable message: {}", e),
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = shared.outgoing.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(_))) | None => break StoreError::Closed,
            Some(Ok(_)) => {
                // Ignore text and pong frames
            }
            Some(Err(e)) => break StoreError::Transport(e.to_string()),
        }
    };

    tracing::info!("Store connection ended: {}", reason);
    shared.shut_down(reason).await;
}

/// Probes the server's health endpoint.
pub async fn check_server(server_url: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client.get(build_http_url(server_url, "/health")).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Builds the WebSocket URL for the store endpoint.
fn build_ws_url(server_url: &str) -> String {
    // Convert http(s) to ws(s) if needed
    let base_url = if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        format!("ws://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}/ws", base_url.trim_end_matches('/'))
}

/// Builds an HTTP URL for a given path.
fn build_http_url(server_url: &str, path: &str) -> String {
    // Convert ws(s) to http(s) if needed
    let base_url = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}
