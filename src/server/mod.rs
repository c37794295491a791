//! Server-side modules for the Laundry Time document store server.

pub mod hub;
pub mod session;
pub mod storage;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use laundry_time_core::store::generate_peer_id;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use hub::{ChangeHub, CollectionChanged};
pub use storage::{ServerStorage, ServerStorageError};

/// State shared by every connection.
pub struct ServerState {
    pub storage: ServerStorage,
    pub hub: ChangeHub,
    /// Identifies this server in handshakes.
    pub peer_id: String,
}

impl ServerState {
    pub fn new(storage: ServerStorage) -> Self {
        Self {
            storage,
            hub: ChangeHub::new(),
            peer_id: generate_peer_id(),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

/// Builds the HTTP router:
/// - `GET /health`: health check
/// - `GET /ws`: document store WebSocket
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
