use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// A notification the core fans out to peers. `kind` matches the
/// `*Request`-adjacent vocabulary from the client-channel protocol
/// (`"peer_joined"`, `"new_producer"`, `"room_dismissed"`, ...).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Notification {
    pub fn new(kind: &'static str, data: impl Serialize) -> Self {
        Self {
            kind,
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn bare(kind: &'static str) -> Self {
        Self { kind, data: None }
    }
}

/// The per-peer server-to-client channel. The core depends only on this
/// trait, never on a concrete transport — the hosting layer supplies a
/// WebSocket-backed implementation.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Walks a peer set and calls `notify` on each channel. Best-effort:
/// failures are impossible to observe here (the trait returns `()`), but
/// implementations are expected to log and swallow their own errors, same
/// as the teacher's WS dispatcher does for a dead connection.
pub async fn fan_out<'a, I>(peers: I, notification: Notification)
where
    I: IntoIterator<Item = &'a std::sync::Arc<dyn ClientChannel>>,
{
    for channel in peers {
        channel.notify(notification.clone()).await;
    }
}

/// A channel that only logs; used in unit tests and as a safe fallback.
pub struct NullChannel;

#[async_trait]
impl ClientChannel for NullChannel {
    async fn notify(&self, notification: Notification) {
        warn!(kind = notification.kind, "NullChannel dropped notification");
    }
}
