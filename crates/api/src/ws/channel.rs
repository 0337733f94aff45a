use async_trait::async_trait;
use axum::extract::ws::Message;
use roomcast_core::notify::{ClientChannel, Notification};
use tracing::warn;

use super::storage::WsSender;

/// Adapts a WebSocket sink into the core's transport-agnostic `ClientChannel`.
pub struct WsChannel {
    peer_id: String,
    sender: WsSender,
}

impl WsChannel {
    pub fn new(peer_id: String, sender: WsSender) -> Self {
        Self { peer_id, sender }
    }
}

#[async_trait]
impl ClientChannel for WsChannel {
    async fn notify(&self, notification: Notification) {
        use futures::SinkExt;

        let text = match serde_json::to_string(&notification) {
            Ok(t) => t,
            Err(err) => {
                warn!(peer_id = %self.peer_id, %err, "failed to serialize notification");
                return;
            }
        };

        let mut guard = self.sender.lock().await;
        if let Err(err) = guard.send(Message::text(text)).await {
            warn!(peer_id = %self.peer_id, %err, "failed to deliver notification over websocket");
        }
    }
}
