use thiserror::Error;

/// Flat error surface for every Scheduler/Room/Peer operation.
///
/// Deliberately not hierarchical: callers match on the variant, not on a
/// chain of `source()`s.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("peer {peer_id} already joined with connection {connection_id}")]
    AlreadyJoined { peer_id: String, connection_id: String },

    #[error("peer {0} does not exist")]
    PeerNotExists(String),

    #[error("connection id mismatch for peer {0}")]
    Disconnected(String),

    #[error("peer {0} is already in a different room")]
    AlreadyInRoom(String),

    #[error("room {0} is closed")]
    RoomClosed(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("peer {0} is not the host of this room")]
    NotHost(String),

    #[error("a peer cannot kick itself")]
    CannotKickSelf,

    #[error("mediasoup operation failed: {0}")]
    MediaBackendFailure(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Helper for the common `mediasoup` call site: `op().await.map_err(media_err)?`.
pub fn media_err(err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::MediaBackendFailure(err.to_string())
}
