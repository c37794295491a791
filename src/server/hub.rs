//! Change notifications between connections.
//!
//! Every committed write is announced on its collection's channel. Listening
//! connections react by reloading the collection and pushing a fresh
//! snapshot, so a missed or lagged announcement costs nothing but a reload.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// A committed change to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChanged {
    pub document_id: String,
    pub revision: u64,
}

/// Tracks listeners per collection for broadcasting changes.
pub struct ChangeHub {
    channels: RwLock<HashMap<String, broadcast::Sender<CollectionChanged>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to changes in a collection.
    pub async fn subscribe(&self, collection: &str) -> broadcast::Receiver<CollectionChanged> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(collection) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(16);
            channels.insert(collection.to_string(), sender);
            receiver
        }
    }

    /// Announces a change to everyone subscribed to the collection.
    ///
    /// A collection whose listeners have all gone away loses its channel.
    pub async fn broadcast(&self, collection: &str, change: CollectionChanged) {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(collection) {
            if sender.send(change).is_err() {
                channels.remove(collection);
            }
        }
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str) -> CollectionChanged {
        CollectionChanged {
            document_id: id.to_string(),
            revision: 1,
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let hub = ChangeHub::new();
        let mut rx = hub.subscribe("laundryRooms").await;

        hub.broadcast("laundryRooms", change("a")).await;

        assert_eq!(rx.try_recv().unwrap(), change("a"));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let hub = ChangeHub::new();
        let mut rooms = hub.subscribe("laundryRooms").await;
        let mut other = hub.subscribe("other").await;

        hub.broadcast("laundryRooms", change("a")).await;

        assert!(rooms.try_recv().is_ok());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let hub = ChangeHub::new();
        hub.broadcast("nobody", change("a")).await;

        // A later subscriber starts from that point on
        let mut rx = hub.subscribe("nobody").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_dropped_after_last_listener_leaves() {
        let hub = ChangeHub::new();
        let first = hub.subscribe("laundryRooms").await;
        let second = hub.subscribe("laundryRooms").await;
        assert_eq!(hub.channels.read().await.len(), 1);

        drop(first);
        hub.broadcast("laundryRooms", change("a")).await;
        assert!(hub.channels.read().await.contains_key("laundryRooms"));

        drop(second);
        hub.broadcast("laundryRooms", change("b")).await;
        assert!(hub.channels.read().await.is_empty());

        // Listening again starts a fresh channel
        let mut rx = hub.subscribe("laundryRooms").await;
        hub.broadcast("laundryRooms", change("c")).await;
        assert_eq!(rx.try_recv().unwrap(), change("c"));
    }
}
