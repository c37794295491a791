//! In-process document store.
//!
//! Behaves like the remote store: full snapshots to every listener after each
//! write, whole-document overwrites, revisions bumped per write. Clones share
//! the same underlying data.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{
    generate_document_id, Document, DocumentListener, DocumentStore, ListenerSender, StoreError,
};

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    listeners: Vec<ListenerSender>,
}

impl Collection {
    /// Pushes the current snapshot to every listener, dropping closed ones.
    fn notify(&mut self) {
        let snapshot = self.documents.clone();
        self.listeners
            .retain(|listener| listener.send(Ok(snapshot.clone())).is_ok());
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    offline: bool,
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Transport("store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Document store kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with a transport error until
    /// switched back. Registered listeners stay registered.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .await
            .collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }

    /// Number of live listeners on a collection.
    pub async fn listener_count(&self, collection: &str) -> usize {
        let mut inner = self.inner.lock().await;
        match inner.collections.get_mut(collection) {
            Some(c) => {
                c.listeners.retain(|l| !l.is_closed());
                c.listeners.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;

        Ok(inner
            .collections
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;

        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.documents.iter().find(|d| d.id == id).cloned()))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;

        let coll = inner.collections.entry(collection.to_string()).or_default();

        let revision = match coll.position(id) {
            Some(index) => {
                let doc = &mut coll.documents[index];
                if let Some(expected) = expected_revision {
                    if doc.revision != expected {
                        return Err(StoreError::Conflict {
                            document_id: id.to_string(),
                            expected,
                        });
                    }
                }
                doc.revision += 1;
                doc.data = data;
                doc.revision
            }
            None => {
                if let Some(expected) = expected_revision {
                    return Err(StoreError::Conflict {
                        document_id: id.to_string(),
                        expected,
                    });
                }
                coll.documents.push(Document {
                    id: id.to_string(),
                    revision: 1,
                    data,
                });
                1
            }
        };

        coll.notify();
        Ok(revision)
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;

        let coll = inner.collections.entry(collection.to_string()).or_default();
        let id = generate_document_id();
        coll.documents.push(Document {
            id: id.clone(),
            revision: 1,
            data,
        });

        coll.notify();
        Ok(id)
    }

    async fn listen(&self, collection: &str) -> Result<DocumentListener, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;

        let coll = inner.collections.entry(collection.to_string()).or_default();
        let (sender, receiver) = mpsc::unbounded_channel();

        // Initial snapshot, delivered before any change
        let _ = sender.send(Ok(coll.documents.clone()));
        coll.listeners.push(sender);

        Ok(DocumentListener::new(receiver))
    }
}
