//! Server-side document storage.
//!
//! All collections live in a single SQLite table:
//! ```text
//! documents(seq, collection, id, revision, data, updated_at)
//! ```
//! `seq` gives listings their insertion order. `data` holds the JSON document
//! body as text. Every write bumps `revision`.

use chrono::Utc;
use laundry_time_core::store::{generate_document_id, Document};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error preparing the database location.
    IoError(PathBuf, std::io::Error),
    /// Error talking to SQLite.
    DatabaseError(sqlx::Error),
    /// Error applying schema migrations.
    MigrationError(sqlx::migrate::MigrateError),
    /// Stored body is not valid JSON.
    CorruptDocument(String, String),
    /// Conditional write against a stale or missing revision.
    Conflict { document_id: String, expected: u64 },
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::DatabaseError(e) => write!(f, "Database error: {}", e),
            ServerStorageError::MigrationError(e) => write!(f, "Migration failed: {}", e),
            ServerStorageError::CorruptDocument(id, e) => {
                write!(f, "Stored document {} is corrupt: {}", id, e)
            }
            ServerStorageError::Conflict {
                document_id,
                expected,
            } => write!(
                f,
                "Document {} is not at revision {}",
                document_id, expected
            ),
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::DatabaseError(e) => Some(e),
            ServerStorageError::MigrationError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ServerStorageError {
    fn from(e: sqlx::Error) -> Self {
        ServerStorageError::DatabaseError(e)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    revision: i64,
    data: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, ServerStorageError> {
        let data: Value = serde_json::from_str(&self.data)
            .map_err(|e| ServerStorageError::CorruptDocument(self.id.clone(), e.to_string()))?;
        Ok(Document {
            id: self.id,
            revision: self.revision as u64,
            data,
        })
    }
}

/// SQLite-backed store for document collections.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    pool: SqlitePool,
}

impl ServerStorage {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, ServerStorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerStorageError::IoError(parent.to_path_buf(), e))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(ServerStorageError::MigrationError)?;

        Ok(Self { pool })
    }

    /// All documents of a collection in insertion order.
    pub async fn list(&self, collection: &str) -> Result<Vec<Document>, ServerStorageError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, revision, data FROM documents WHERE collection = ? ORDER BY seq",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    pub async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, ServerStorageError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, revision, data FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Writes a whole document and returns its new revision.
    ///
    /// Without `expected_revision` this is an upsert. With it, the write only
    /// happens if the stored document is at exactly that revision.
    pub async fn set(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        expected_revision: Option<u64>,
    ) -> Result<u64, ServerStorageError> {
        let body = data.to_string();
        let updated_at = Utc::now().to_rfc3339();

        let revision: Option<i64> = match expected_revision {
            None => Some(
                sqlx::query_scalar(
                    r#"
                    INSERT INTO documents (collection, id, revision, data, updated_at)
                    VALUES (?, ?, 1, ?, ?)
                    ON CONFLICT (collection, id) DO UPDATE
                    SET revision = revision + 1, data = excluded.data, updated_at = excluded.updated_at
                    RETURNING revision
                    "#,
                )
                .bind(collection)
                .bind(id)
                .bind(&body)
                .bind(&updated_at)
                .fetch_one(&self.pool)
                .await?,
            ),
            Some(expected) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE documents
                    SET revision = revision + 1, data = ?, updated_at = ?
                    WHERE collection = ? AND id = ? AND revision = ?
                    RETURNING revision
                    "#,
                )
                .bind(&body)
                .bind(&updated_at)
                .bind(collection)
                .bind(id)
                .bind(expected as i64)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match revision {
            Some(revision) => Ok(revision as u64),
            None => Err(ServerStorageError::Conflict {
                document_id: id.to_string(),
                expected: expected_revision.unwrap_or_default(),
            }),
        }
    }

    /// Creates a document under a fresh id. Returns the id.
    pub async fn add(&self, collection: &str, data: &Value) -> Result<String, ServerStorageError> {
        let id = generate_document_id();

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, revision, data, updated_at)
            VALUES (?, ?, 1, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&id)
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}
