use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Tracks the live WebSocket sink for each connected peer id. One entry per
/// peer: `roomcast-core` already rejects a second connection joining under
/// the same peer id with a different connection id, so there is never more
/// than one sender to track per key.
pub struct WsStorage {
    connections: DashMap<String, WsSender>,
}

impl WsStorage {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add(&self, peer_id: String, sender: WsSender) {
        self.connections.insert(peer_id, sender);
    }

    pub fn remove(&self, peer_id: &str, sender: &WsSender) {
        if let Some(existing) = self.connections.get(peer_id) {
            if Arc::ptr_eq(&existing, sender) {
                drop(existing);
                self.connections.remove(peer_id);
            }
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<WsSender> {
        self.connections.get(peer_id).map(|s| s.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for WsStorage {
    fn default() -> Self {
        Self::new()
    }
}
