use std::collections::HashMap;
use std::sync::Arc;

use mediasoup::audio_level_observer::{AudioLevelObserver, AudioLevelObserverOptions};
use mediasoup::router::{Router, RouterOptions};
use mediasoup::worker::Worker;
use roomcast_config::RoomSettings;
use tracing::{debug, info};

use crate::error::{media_err, SchedulerResult};
use crate::media::media_codecs;
use crate::notify::{fan_out, Notification};
use crate::peer::Peer;
use crate::types::{PeerId, RoomId};

/// A conference: one mediasoup Router, one AudioLevelObserver, and the set of
/// peers currently inside. `host_peer_id` is the peer that created the room;
/// it never changes for the lifetime of the room (rooms are dismissed, not
/// handed off).
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    pub host_peer_id: PeerId,
    pub router: Router,
    audio_level_observer: AudioLevelObserver,
    /// Guards the dismiss-in-progress transition. Held briefly: readers
    /// (join/produce/consume) take a read lock and bail out if `true`;
    /// `Scheduler::dismiss_room` takes the write lock once to flip it before
    /// it ever touches the peers table.
    closing: tokio::sync::RwLock<bool>,
    peers: tokio::sync::RwLock<HashMap<PeerId, Arc<Peer>>>,
}

impl Room {
    pub async fn new(
        room_id: RoomId,
        name: String,
        host_peer_id: PeerId,
        worker: &Worker,
        settings: &RoomSettings,
    ) -> SchedulerResult<Self> {
        let router = worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(media_err)?;

        let mut observer_options = AudioLevelObserverOptions::default();
        observer_options.max_entries = std::num::NonZeroU16::new(settings.audio_level_max_entries)
            .unwrap_or(std::num::NonZeroU16::new(1).unwrap());
        observer_options.threshold = settings.audio_level_threshold;
        observer_options.interval = settings.audio_level_interval_ms;

        let audio_level_observer = router
            .create_audio_level_observer(observer_options)
            .await
            .map_err(media_err)?;

        info!(%room_id, host_peer_id = %host_peer_id, "room created");

        Ok(Self {
            room_id,
            name,
            host_peer_id,
            router,
            audio_level_observer,
            closing: tokio::sync::RwLock::new(false),
            peers: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    pub async fn is_closing(&self) -> bool {
        *self.closing.read().await
    }

    /// Flips the closing flag. Returns `false` if it was already set (the
    /// caller should treat a second dismiss as a no-op, not an error).
    pub async fn begin_closing(&self) -> bool {
        let mut guard = self.closing.write().await;
        if *guard {
            return false;
        }
        *guard = true;
        true
    }

    /// Wires `on_volumes`/`on_silence` to fan out `"active_speaker"` /
    /// `"silence"` notifications to every peer currently in the room. Must be
    /// called once, right after construction — the returned handlers detach
    /// themselves and live for the router's lifetime.
    pub fn watch_audio_levels(self: &Arc<Self>) {
        let room = Arc::clone(self);
        self.audio_level_observer
            .on_volumes(move |volumes| {
                let room = Arc::clone(&room);
                let entries: Vec<_> = volumes
                    .iter()
                    .filter_map(|entry| {
                        let peer_id = entry.producer.app_data().downcast_ref::<PeerId>().cloned()?;
                        Some((peer_id, entry.producer.id(), entry.volume))
                    })
                    .collect();
                tokio::spawn(async move {
                    for (peer_id, producer_id, volume) in entries {
                        room.broadcast(Notification::new(
                            "active_speaker",
                            serde_json::json!({
                                "peer_id": peer_id,
                                "producer_id": producer_id.to_string(),
                                "volume": volume,
                            }),
                        ))
                        .await;
                    }
                });
            })
            .detach();

        let room = Arc::clone(self);
        self.audio_level_observer
            .on_silence(move || {
                let room = Arc::clone(&room);
                tokio::spawn(async move {
                    room.broadcast(Notification::bare("silence")).await;
                });
            })
            .detach();
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn add(&self, peer: Arc<Peer>) {
        let peer_id = peer.peer_id.clone();
        self.peers.write().await.insert(peer_id.clone(), peer);
        debug!(room_id = %self.room_id, %peer_id, "peer added to room");
    }

    /// Removes `peer_id` from membership. Returns the remaining peers'
    /// channels so the caller can notify siblings of the departure.
    pub async fn remove(&self, peer_id: &PeerId) -> Vec<PeerId> {
        let mut peers = self.peers.write().await;
        peers.remove(peer_id);
        peers.keys().cloned().collect()
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn other_peer_ids(&self, except: &PeerId) -> Vec<PeerId> {
        self.peers
            .read()
            .await
            .keys()
            .filter(|id| *id != except)
            .cloned()
            .collect()
    }

    pub async fn broadcast(&self, notification: Notification) {
        let peers = self.peers.read().await;
        let channels: Vec<_> = peers.values().map(|p| Arc::clone(&p.channel)).collect();
        drop(peers);
        fan_out(channels.iter(), notification).await;
    }

    pub fn audio_level_observer(&self) -> &AudioLevelObserver {
        &self.audio_level_observer
    }

    pub async fn is_host(&self, peer_id: &PeerId) -> bool {
        &self.host_peer_id == peer_id
    }

    /// Full teardown of every non-host peer's media state without removing
    /// them from membership — used by the dismissal sweep, which needs the
    /// membership list intact until every client has acked the drain.
    pub async fn force_leave_all_except_host(&self) -> Vec<Arc<Peer>> {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|p| p.peer_id != self.host_peer_id)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.room_id)
            .field("name", &self.name)
            .field("host_peer_id", &self.host_peer_id)
            .finish_non_exhaustive()
    }
}
