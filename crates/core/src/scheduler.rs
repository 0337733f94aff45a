use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mediasoup::consumer::ConsumerId;
use mediasoup::producer::ProducerId;
use mediasoup::transport::TransportId;
use roomcast_config::Settings;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::media::WorkerPool;
use crate::notify::{ClientChannel, Notification};
use crate::peer::Peer;
use crate::room::Room;
use crate::types::{
    ConnectWebRtcTransportRequest, ConsumeRequest, ConsumerInfo, CreatePlainTransportRequest,
    CreateWebRtcTransportRequest, DismissRoomResult, ExistingProducer, JoinRequest,
    JoinRoomRequest, KickPeerResult, LeaveRoomResult, PeerId, PeerSummary, ProduceRequest,
    ProduceResult, PullRequest, PullResult, RoomId, RoomSnapshot, SetConsumerPreferredLayersRequest,
    SetConsumerPriorityRequest, TransportDirection,
};

/// The top-level orchestrator. Owns the peer table and the room table and
/// enforces the lock order documented on each method: peer table, then room
/// table/creation slot, then a room's own closing flag, then its membership
/// map, then a peer's own resource tables. No method acquires a
/// lower-numbered lock while holding a higher-numbered one.
pub struct Scheduler {
    settings: Settings,
    worker_pool: WorkerPool,
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    /// Single-slot mutex serializing "create room if absent" so two
    /// concurrent `joinRoom` calls for a brand-new room id can't both win
    /// the create race and end up with two Routers for the same id.
    room_creation_lock: Mutex<()>,
}

impl Scheduler {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let worker_pool = WorkerPool::new(&settings.mediasoup).await?;
        Ok(Self {
            settings,
            worker_pool,
            peers: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            room_creation_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers a new connection as a Peer. Fails with `AlreadyJoined` if
    /// `peer_id` is already present with a different `connection_id` still
    /// attached; a matching `connection_id` is treated as an idempotent
    /// re-join and replaces the old Peer entry (dropping it, which cascades
    /// through mediasoup's own Drop-based teardown of its transports).
    #[instrument(skip(self, req, channel), fields(peer_id = %peer_id))]
    pub async fn join(
        &self,
        peer_id: PeerId,
        connection_id: String,
        req: JoinRequest,
        channel: Arc<dyn ClientChannel>,
    ) -> SchedulerResult<()> {
        let mut peers = self.peers.write().await;
        if let Some(existing) = peers.get(&peer_id) {
            if existing.connection_id != connection_id {
                return Err(SchedulerError::AlreadyJoined {
                    peer_id,
                    connection_id: existing.connection_id.clone(),
                });
            }
        }

        let peer = Arc::new(Peer::new(
            peer_id.clone(),
            connection_id,
            req.display_name,
            req.rtp_capabilities,
            req.sctp_capabilities,
            req.sources,
            req.app_data,
            channel,
        ));
        peers.insert(peer_id.clone(), peer);
        info!(%peer_id, "peer joined");
        Ok(())
    }

    /// Removes a peer entirely: leaves its room (if any, notifying siblings)
    /// and drops it from the peer table. Validates `connection_id` to guard
    /// against a stale connection tearing down a peer that already
    /// reconnected under a new connection id.
    #[instrument(skip(self))]
    pub async fn leave(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;

        if let Some(room_id) = peer.room_id().await {
            if let Err(err) = self.leave_room_inner(&peer, &room_id).await {
                warn!(%peer_id, %room_id, %err, "error leaving room during peer teardown; continuing");
            }
        }

        self.peers.write().await.remove(peer_id);
        info!(%peer_id, "peer left");
        Ok(())
    }

    async fn get_peer(&self, peer_id: &PeerId) -> SchedulerResult<Arc<Peer>> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| SchedulerError::PeerNotExists(peer_id.clone()))
    }

    /// Looks up `peer_id` and enforces the cross-method guarantee that a
    /// command is rejected with `Disconnected` unless the caller's
    /// `connection_id` matches the one recorded at `join` time. Every public
    /// method below that takes a `connection_id` parameter goes through
    /// this instead of `get_peer` directly.
    async fn get_connected_peer(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<Arc<Peer>> {
        let peer = self.get_peer(peer_id).await?;
        if peer.connection_id != connection_id {
            return Err(SchedulerError::Disconnected(peer_id.clone()));
        }
        Ok(peer)
    }

    async fn get_room(&self, room_id: &RoomId) -> SchedulerResult<Arc<Room>> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| SchedulerError::RoomNotFound(room_id.clone()))
    }

    /// Finds the room by id, creating it (with the calling peer as host) if
    /// it does not exist yet. The create path is serialized by
    /// `room_creation_lock` so concurrent first-joiners never race into two
    /// Routers for the same room id.
    async fn get_or_create_room(&self, room_id: &RoomId, name: &str, host_peer_id: &PeerId) -> SchedulerResult<(Arc<Room>, bool)> {
        if let Some(room) = self.rooms.read().await.get(room_id).cloned() {
            return Ok((room, false));
        }

        let _creation_guard = self.room_creation_lock.lock().await;
        if let Some(room) = self.rooms.read().await.get(room_id).cloned() {
            return Ok((room, false));
        }

        let worker = self.worker_pool.get_worker();
        let room = Arc::new(
            Room::new(
                room_id.clone(),
                name.to_string(),
                host_peer_id.clone(),
                worker,
                &self.settings.room,
            )
            .await?,
        );
        room.watch_audio_levels();
        self.rooms.write().await.insert(room_id.clone(), Arc::clone(&room));
        Ok((room, true))
    }

    /// Joins (or idempotently re-joins) a room. The first peer to reach a
    /// room id becomes its host. Returns a snapshot of the room plus whether
    /// this call created it.
    #[instrument(skip(self, req))]
    pub async fn join_room(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: JoinRoomRequest,
    ) -> SchedulerResult<(RoomSnapshot, bool)> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;

        if let Some(current) = peer.room_id().await {
            if current == req.room_id {
                let room = self.get_room(&current).await?;
                return Ok((self.snapshot(&room).await, false));
            }
            return Err(SchedulerError::AlreadyInRoom(peer_id.clone()));
        }

        let name = req
            .room_name
            .unwrap_or_else(|| self.settings.room.default_name.clone());
        let (room, created) = self.get_or_create_room(&req.room_id, &name, peer_id).await?;

        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(req.room_id.clone()));
        }

        peer.mark_joined_room(req.room_id.clone()).await?;
        room.add(Arc::clone(&peer)).await;

        let role = if created { "host" } else { "guest" };
        peer.set_internal_data("role".to_string(), json!(role)).await;

        room.broadcast(Notification::new(
            "peer_joined",
            json!({ "peer_id": peer_id, "display_name": peer.display_name }),
        ))
        .await;
        self.broadcast_internal_data_changed(&peer).await;

        info!(
            room_id = %req.room_id,
            %peer_id,
            created,
            room_size = room.peer_count().await,
            "peer joined room"
        );
        Ok((self.snapshot(&room).await, created))
    }

    async fn snapshot(&self, room: &Room) -> RoomSnapshot {
        let mut peers = Vec::new();
        for peer_id in room.peer_ids().await {
            if let Some(peer) = room.get(&peer_id).await {
                peers.push(PeerSummary {
                    peer_id: peer.peer_id.clone(),
                    display_name: peer.display_name.clone(),
                    sources: peer.sources.read().await.clone(),
                    app_data: peer.snapshot_app_data().await,
                });
            }
        }
        RoomSnapshot {
            room_id: room.room_id.clone(),
            name: room.name.clone(),
            host_peer_id: Some(room.host_peer_id.clone()),
            peers,
        }
    }

    /// Fans out `"peer_internal_data_changed"` to the peer's roommates, or
    /// straight back to the peer itself if it isn't in a room yet.
    async fn broadcast_internal_data_changed(&self, peer: &Arc<Peer>) {
        let data = json!({
            "peer_id": peer.peer_id,
            "internal_data": peer.snapshot_internal_data().await,
        });
        if let Some(room_id) = peer.room_id().await {
            if let Ok(room) = self.get_room(&room_id).await {
                room.broadcast(Notification::new("peer_internal_data_changed", data)).await;
                return;
            }
        }
        peer.channel
            .notify(Notification::new("peer_internal_data_changed", data))
            .await;
    }

    /// Ordinary leave: the peer keeps its connection but exits the room.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<LeaveRoomResult> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        self.leave_room_inner(&peer, &room_id).await
    }

    async fn leave_room_inner(&self, peer: &Arc<Peer>, room_id: &RoomId) -> SchedulerResult<LeaveRoomResult> {
        let room = self.get_room(room_id).await?;
        let is_host = room.is_host(&peer.peer_id).await;

        if is_host {
            // Host-leave always dismisses the room rather than leaving it
            // headless; reuse the dismissal path so both exits share one
            // teardown implementation.
            let result = self.dismiss_room_inner(&room, peer).await?;
            return Ok(LeaveRoomResult {
                peer_id: peer.peer_id.clone(),
                sibling_peer_ids: result.other_peer_ids,
            });
        }

        peer.leave_room().await;
        let remaining = room.remove(&peer.peer_id).await;

        room.broadcast(Notification::new("peer_left", json!({ "peer_id": peer.peer_id })))
            .await;

        info!(room_id = %room_id, peer_id = %peer.peer_id, "peer left room");
        Ok(LeaveRoomResult {
            peer_id: peer.peer_id.clone(),
            sibling_peer_ids: remaining,
        })
    }

    /// Host-only full room teardown. Order: mark closing (blocks new joins),
    /// force every non-host peer out (closing their media and notifying
    /// them), wait `dismiss_drain_ms` for in-flight mediasoup callbacks to
    /// settle, tear down the host itself, then drop the room from the table
    /// so its Router and AudioLevelObserver close.
    #[instrument(skip(self))]
    pub async fn dismiss_room(
        &self,
        room_id: &RoomId,
        requester_peer_id: &PeerId,
        connection_id: &str,
    ) -> SchedulerResult<DismissRoomResult> {
        let room = self.get_room(room_id).await?;
        let requester = self.get_connected_peer(requester_peer_id, connection_id).await?;
        if !room.is_host(requester_peer_id).await {
            return Err(SchedulerError::NotHost(requester_peer_id.clone()));
        }
        self.dismiss_room_inner(&room, &requester).await
    }

    async fn dismiss_room_inner(&self, room: &Arc<Room>, host: &Arc<Peer>) -> SchedulerResult<DismissRoomResult> {
        if !room.begin_closing().await {
            return Err(SchedulerError::RoomClosed(room.room_id.clone()));
        }

        let others = room.force_leave_all_except_host().await;
        let other_ids: Vec<PeerId> = others.iter().map(|p| p.peer_id.clone()).collect();

        room.broadcast(Notification::bare("room_dismissed")).await;

        for peer in &others {
            peer.force_leave_room().await;
        }

        if self.settings.room.dismiss_drain_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.settings.room.dismiss_drain_ms)).await;
        }

        for peer_id in &other_ids {
            room.remove(peer_id).await;
            if let Ok(peer) = self.get_peer(peer_id).await {
                *peer.current_room_id.write().await = None;
            }
            self.peers.write().await.remove(peer_id);
        }

        host.force_leave_room().await;
        room.remove(&host.peer_id).await;
        self.peers.write().await.remove(&host.peer_id);

        self.rooms.write().await.remove(&room.room_id);

        info!(room_id = %room.room_id, host_peer_id = %host.peer_id, others = other_ids.len(), "room dismissed");

        Ok(DismissRoomResult {
            room_id: room.room_id.clone(),
            host_peer_id: host.peer_id.clone(),
            other_peer_ids: other_ids,
        })
    }

    /// Host kicks a single non-host peer. Unlike dismissal, the room stays
    /// open; only the target leaves.
    #[instrument(skip(self))]
    pub async fn kick_peer(
        &self,
        room_id: &RoomId,
        host_peer_id: &PeerId,
        connection_id: &str,
        target_peer_id: &PeerId,
    ) -> SchedulerResult<KickPeerResult> {
        if target_peer_id == host_peer_id {
            return Err(SchedulerError::CannotKickSelf);
        }
        self.get_connected_peer(host_peer_id, connection_id).await?;
        let room = self.get_room(room_id).await?;
        if !room.is_host(host_peer_id).await {
            return Err(SchedulerError::NotHost(host_peer_id.clone()));
        }
        let target = room
            .get(target_peer_id)
            .await
            .ok_or_else(|| SchedulerError::PeerNotExists(target_peer_id.clone()))?;

        target.force_leave_room().await;
        let remaining = room.remove(target_peer_id).await;

        target.channel.notify(Notification::bare("kicked")).await;
        room.broadcast(Notification::new("peer_kicked", json!({ "peer_id": target_peer_id })))
            .await;

        info!(room_id = %room_id, %target_peer_id, "peer kicked");
        Ok(KickPeerResult {
            room_id: room_id.clone(),
            target_peer_id: target_peer_id.clone(),
            sibling_peer_ids: remaining,
        })
    }

    #[instrument(skip(self, req))]
    pub async fn create_webrtc_transport(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: CreateWebRtcTransportRequest,
    ) -> SchedulerResult<mediasoup::webrtc_transport::WebRtcTransport> {
        let _ = req.force_tcp; // listen info currently fixed to UDP+TCP; kept for protocol symmetry
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(room_id));
        }
        peer.create_webrtc_transport(&room.router, &self.settings.mediasoup, TransportDirection::Send)
            .await
    }

    #[instrument(skip(self, req))]
    pub async fn create_recv_webrtc_transport(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: CreateWebRtcTransportRequest,
    ) -> SchedulerResult<mediasoup::webrtc_transport::WebRtcTransport> {
        let _ = req.force_tcp;
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(room_id));
        }
        peer.create_webrtc_transport(&room.router, &self.settings.mediasoup, TransportDirection::Recv)
            .await
    }

    /// Plain transports are recv-only taps onto the room's Router; used for
    /// RTP bridges rather than browser peers.
    #[instrument(skip(self, req))]
    pub async fn create_plain_transport(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: CreatePlainTransportRequest,
    ) -> SchedulerResult<mediasoup::plain_transport::PlainTransport> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(room_id));
        }
        peer.create_plain_transport(&room.router, &self.settings.mediasoup, req.comedia)
            .await
    }

    pub async fn connect_webrtc_transport(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: ConnectWebRtcTransportRequest,
    ) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let transport_id: TransportId = req
            .transport_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid transport id".into()))?;
        peer.connect_webrtc_transport(transport_id, req.dtls_parameters).await
    }

    /// Resolves `req.sources` against the named producer peer, returning
    /// producers available now plus the sources the caller should expect a
    /// `newProducer` notification for once the producer peer starts sending.
    #[instrument(skip(self, req))]
    pub async fn pull(&self, consumer_peer_id: &PeerId, connection_id: &str, req: PullRequest) -> SchedulerResult<PullResult> {
        let consumer_peer = self.get_connected_peer(consumer_peer_id, connection_id).await?;
        let producer_peer = self.get_peer(&req.producer_peer_id).await?;

        let consumer_room = consumer_peer.room_id().await;
        let producer_room = producer_peer.room_id().await;
        if consumer_room.is_none() || consumer_room != producer_room {
            return Err(SchedulerError::RoomNotFound(consumer_peer_id.clone()));
        }
        let room = self.get_room(consumer_room.as_ref().unwrap()).await?;
        if !room.contains(consumer_peer_id).await || !room.contains(&req.producer_peer_id).await {
            return Err(SchedulerError::RoomNotFound(consumer_peer_id.clone()));
        }

        Ok(Peer::pull(&producer_peer, consumer_peer_id, &req).await)
    }

    #[instrument(skip(self, req))]
    pub async fn produce(&self, peer_id: &PeerId, connection_id: &str, req: ProduceRequest) -> SchedulerResult<ProduceResult> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(room_id));
        }

        let result = peer
            .produce(&room.router, Some(room.audio_level_observer()), &req)
            .await?;

        room.broadcast(Notification::new(
            "new_producer",
            json!({ "peer_id": peer_id, "producer_id": result.producer_id, "source": req.source }),
        ))
        .await;

        Ok(result)
    }

    #[instrument(skip(self, req))]
    pub async fn consume(&self, peer_id: &PeerId, connection_id: &str, req: ConsumeRequest) -> SchedulerResult<Option<ConsumerInfo>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let producer_peer = self.get_peer(&req.producer_peer_id).await?;

        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        if room.is_closing().await {
            return Err(SchedulerError::RoomClosed(room_id));
        }

        let transport_id: TransportId = req
            .transport_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid transport id".into()))?;
        let producer_id: ProducerId = req
            .producer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid producer id".into()))?;

        peer.consume(&room.router, &producer_peer, transport_id, producer_id).await
    }

    pub async fn close_producer(&self, peer_id: &PeerId, connection_id: &str, producer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let producer_id: ProducerId = producer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid producer id".into()))?;
        let source = peer.producer_source(&producer_id).await;
        let closed = peer.close_producer(&producer_id).await;
        if closed {
            if let Some(room_id) = peer.room_id().await {
                if let Ok(room) = self.get_room(&room_id).await {
                    room.broadcast(Notification::new(
                        "producer_closed",
                        json!({ "peer_id": peer_id, "producer_id": producer_id.to_string(), "source": source }),
                    ))
                    .await;
                }
            }
        }
        Ok(closed)
    }

    pub async fn close_producers_with_sources(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        sources: HashSet<String>,
    ) -> SchedulerResult<usize> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let closed = peer.close_producers_with_sources(&sources).await;
        Ok(closed.len())
    }

    pub async fn close_all_producers(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<usize> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        Ok(peer.close_all_producers().await.len())
    }

    pub async fn pause_producer(&self, peer_id: &PeerId, connection_id: &str, producer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let producer_id: ProducerId = producer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid producer id".into()))?;
        peer.pause_producer(&producer_id).await
    }

    pub async fn resume_producer(&self, peer_id: &PeerId, connection_id: &str, producer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let producer_id: ProducerId = producer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid producer id".into()))?;
        peer.resume_producer(&producer_id).await
    }

    pub async fn close_consumer(&self, peer_id: &PeerId, connection_id: &str, consumer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        Ok(peer.close_consumer(&consumer_id).await)
    }

    pub async fn pause_consumer(&self, peer_id: &PeerId, connection_id: &str, consumer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        peer.pause_consumer(&consumer_id).await
    }

    pub async fn resume_consumer(&self, peer_id: &PeerId, connection_id: &str, consumer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        peer.resume_consumer(&consumer_id).await
    }

    pub async fn set_consumer_preferred_layers(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: SetConsumerPreferredLayersRequest,
    ) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = req
            .consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        let layers = req.layers();
        peer.set_consumer_preferred_layers(&consumer_id, layers).await
    }

    pub async fn set_consumer_priority(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        req: SetConsumerPriorityRequest,
    ) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = req
            .consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        peer.set_consumer_priority(&consumer_id, req.priority).await
    }

    pub async fn request_consumer_key_frame(&self, peer_id: &PeerId, connection_id: &str, consumer_id: &str) -> SchedulerResult<bool> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let consumer_id: ConsumerId = consumer_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid consumer id".into()))?;
        peer.request_consumer_key_frame(&consumer_id).await
    }

    pub async fn restart_ice(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        transport_id: &str,
    ) -> SchedulerResult<Option<mediasoup::data_structures::IceParameters>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let transport_id: TransportId = transport_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid transport id".into()))?;
        peer.restart_ice(&transport_id).await
    }

    pub async fn set_app_data(&self, peer_id: &PeerId, connection_id: &str, key: String, value: serde_json::Value) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.set_app_data(key, value).await;
        Ok(())
    }

    pub async fn unset_app_data(&self, peer_id: &PeerId, connection_id: &str, key: &str) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.unset_app_data(key).await;
        Ok(())
    }

    pub async fn clear_app_data(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.clear_app_data().await;
        Ok(())
    }

    pub async fn set_peer_internal_data(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        key: String,
        value: serde_json::Value,
    ) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.set_internal_data(key, value).await;
        self.broadcast_internal_data_changed(&peer).await;
        Ok(())
    }

    pub async fn unset_peer_internal_data(&self, peer_id: &PeerId, connection_id: &str, key: &str) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.unset_internal_data(key).await;
        self.broadcast_internal_data_changed(&peer).await;
        Ok(())
    }

    pub async fn get_peer_internal_data(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
    ) -> SchedulerResult<HashMap<String, serde_json::Value>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        Ok(peer.snapshot_internal_data().await)
    }

    pub async fn clear_peer_internal_data(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<()> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        peer.clear_internal_data().await;
        self.broadcast_internal_data_changed(&peer).await;
        Ok(())
    }

    /// Role and membership queries, filtered to other peers in the caller's
    /// current room.
    pub async fn get_peer_role(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<Option<String>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        Ok(peer.role().await)
    }

    pub async fn get_other_peer_ids(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        role: Option<&str>,
    ) -> SchedulerResult<Vec<PeerId>> {
        Ok(self
            .get_other_peers(peer_id, connection_id, role)
            .await?
            .into_iter()
            .map(|p| p.peer_id)
            .collect())
    }

    pub async fn get_other_peers(
        &self,
        peer_id: &PeerId,
        connection_id: &str,
        role: Option<&str>,
    ) -> SchedulerResult<Vec<PeerSummary>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;

        let mut out = Vec::new();
        for other_id in room.other_peer_ids(peer_id).await {
            let Some(other) = room.get(&other_id).await else { continue };
            if let Some(role) = role {
                if other.role().await.as_deref() != Some(role) {
                    continue;
                }
            }
            out.push(PeerSummary {
                peer_id: other.peer_id.clone(),
                display_name: other.display_name.clone(),
                sources: other.sources.read().await.clone(),
                app_data: other.snapshot_app_data().await,
            });
        }
        Ok(out)
    }

    pub async fn room_snapshot(&self, room_id: &RoomId) -> SchedulerResult<RoomSnapshot> {
        let room = self.get_room(room_id).await?;
        Ok(self.snapshot(&room).await)
    }

    pub async fn existing_producers_for(&self, peer_id: &PeerId, connection_id: &str) -> SchedulerResult<Vec<ExistingProducer>> {
        let peer = self.get_connected_peer(peer_id, connection_id).await?;
        let room_id = peer
            .room_id()
            .await
            .ok_or_else(|| SchedulerError::RoomNotFound(peer_id.clone()))?;
        let room = self.get_room(&room_id).await?;
        let mut out = Vec::new();
        for other_id in room.other_peer_ids(peer_id).await {
            if let Some(other) = room.get(&other_id).await {
                for (producer_id, source) in other.list_producers().await {
                    out.push(ExistingProducer {
                        producer_id: producer_id.to_string(),
                        producer_peer_id: other_id.clone(),
                        source,
                    });
                }
            }
        }
        Ok(out)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }
}
