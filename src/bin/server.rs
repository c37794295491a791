//! Laundry Time Store Server
//!
//! A document store server that keeps laundry room documents in SQLite and
//! pushes every change to listening clients over WebSocket.
//!
//! # Configuration
//!
//! Environment variables:
//! - `LAUNDRY_PORT`: Port to listen on (default: 8080)
//! - `LAUNDRY_DATABASE_PATH`: SQLite database file
//!   (default: ~/.local/share/laundrytime-server/laundry.db)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /ws`: Document store WebSocket

use laundrytime::server::{router, ServerState, ServerStorage};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct ServerConfig {
    /// Port to listen on
    port: u16,
    /// SQLite database file
    database_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self::from_vars(
            std::env::var("LAUNDRY_PORT").ok(),
            std::env::var("LAUNDRY_DATABASE_PATH").ok(),
        )
    }

    fn from_vars(port: Option<String>, database_path: Option<String>) -> Self {
        let port = port.and_then(|p| p.parse().ok()).unwrap_or(8080);

        let database_path = database_path.map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("laundrytime-server")
                .join("laundry.db")
        });

        Self {
            port,
            database_path,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "laundrytime=info,laundrytime_server=info,laundry_time_core=info,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(ServerConfig::from_env()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Database: {}", config.database_path.display());
    let storage = ServerStorage::open(&config.database_path).await?;

    let app = router(Arc::new(ServerState::new(storage)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::from_vars(None, None);
        assert_eq!(config.port, 8080);
        assert!(config.database_path.ends_with("laundrytime-server/laundry.db"));
    }

    #[test]
    fn test_config_from_vars() {
        let config =
            ServerConfig::from_vars(Some("9090".to_string()), Some("/srv/laundry.db".to_string()));
        assert_eq!(config.port, 9090);
        assert_eq!(config.database_path, PathBuf::from("/srv/laundry.db"));

        let config = ServerConfig::from_vars(Some("not-a-port".to_string()), None);
        assert_eq!(config.port, 8080);
    }
}
