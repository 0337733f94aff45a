use axum::extract::ws::Message;
use futures::SinkExt;
use tracing::warn;

use super::storage::WsStorage;

/// Sends a one-off JSON value (typically a request/response envelope, not a
/// room-wide notification — those go through `roomcast_core`'s `ClientChannel`
/// fan-out) to a single connected peer.
pub async fn send_to_peer(ws_storage: &WsStorage, peer_id: &str, message: &serde_json::Value) {
    let Some(sender) = ws_storage.get(peer_id) else {
        return;
    };
    let text = serde_json::to_string(message).unwrap_or_default();
    let mut guard = sender.lock().await;
    if let Err(err) = guard.send(Message::text(text)).await {
        warn!(%peer_id, %err, "failed to send WS message");
    }
}
