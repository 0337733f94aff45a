use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mediasoup::consumer::{Consumer, ConsumerOptions};
use mediasoup::data_structures::DtlsParameters;
use mediasoup::plain_transport::PlainTransport;
use mediasoup::producer::{Producer, ProducerId, ProducerOptions};
use mediasoup::router::Router;
use mediasoup::rtp_parameters::RtpCapabilities;
use mediasoup::sctp_parameters::SctpCapabilities;
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_transport::{WebRtcTransport, WebRtcTransportRemoteParameters};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{media_err, SchedulerError, SchedulerResult};
use crate::media::{create_plain_transport_on, create_webrtc_transport_on};
use crate::types::{
    ConsumerInfo, DischargedPull, ExistingProducer, PeerId, ProduceRequest, ProduceResult,
    PullRequest, PullResult, RoomId, Source, TransportDirection,
};

/// A deferred consume intent recorded on the producer-side peer: "when this
/// peer produces `source`, create a Consumer on `consumer_peer_id`".
#[derive(Debug, Clone)]
pub struct PullPadding {
    pub consumer_peer_id: PeerId,
    pub source: Source,
}

struct ProducerEntry {
    producer: Producer,
    source: Source,
}

/// Either transport kind a Peer may own. Produce/consume are only valid on
/// the WebRtc variant; Plain transports exist for RTP taps and are otherwise
/// inert here.
enum AnyTransport {
    WebRtc(WebRtcTransport),
    Plain(PlainTransport),
}

impl AnyTransport {
    fn id(&self) -> TransportId {
        match self {
            AnyTransport::WebRtc(t) => t.id(),
            AnyTransport::Plain(t) => t.id(),
        }
    }
}

struct PeerTransport {
    direction: TransportDirection,
    transport: AnyTransport,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<mediasoup::consumer::ConsumerId, Consumer>,
}

/// A single participant's server-side state: identity, capabilities, owned
/// transports/producers/consumers, and outstanding pull paddings.
///
/// `current_room_id` is a plain id, not a reference to the `Room` — Peer and
/// Room never point at each other directly, which is what makes host
/// dismissal a pure table mutation at the Scheduler level (see room.rs).
pub struct Peer {
    pub peer_id: PeerId,
    pub connection_id: String,
    pub display_name: String,
    pub rtp_capabilities: RtpCapabilities,
    pub sctp_capabilities: Option<SctpCapabilities>,
    pub sources: RwLock<HashSet<Source>>,
    pub app_data: RwLock<HashMap<String, Value>>,
    pub internal_data: RwLock<HashMap<String, Value>>,
    pub current_room_id: RwLock<Option<RoomId>>,
    pub channel: Arc<dyn crate::notify::ClientChannel>,
    transports: RwLock<HashMap<TransportId, PeerTransport>>,
    pull_paddings: RwLock<Vec<PullPadding>>,
}

impl Peer {
    pub fn new(
        peer_id: PeerId,
        connection_id: String,
        display_name: String,
        rtp_capabilities: RtpCapabilities,
        sctp_capabilities: Option<SctpCapabilities>,
        sources: HashSet<Source>,
        app_data: HashMap<String, Value>,
        channel: Arc<dyn crate::notify::ClientChannel>,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            display_name,
            rtp_capabilities,
            sctp_capabilities,
            sources: RwLock::new(sources),
            app_data: RwLock::new(app_data),
            internal_data: RwLock::new(HashMap::new()),
            current_room_id: RwLock::new(None),
            channel,
            transports: RwLock::new(HashMap::new()),
            pull_paddings: RwLock::new(Vec::new()),
        }
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        self.current_room_id.read().await.clone()
    }

    /// Sets `current_room_id`. Fails with `AlreadyInRoom` if already set.
    /// Room membership (`room.add`) is performed by the caller under the
    /// room's own write lock, per the level-4-then-5 lock order.
    pub async fn mark_joined_room(&self, room_id: RoomId) -> SchedulerResult<()> {
        let mut guard = self.current_room_id.write().await;
        if guard.is_some() {
            return Err(SchedulerError::AlreadyInRoom(self.peer_id.clone()));
        }
        *guard = Some(room_id);
        Ok(())
    }

    /// Closes every transport (cascading to its producers/consumers via
    /// `mediasoup`'s own Drop-based teardown), clears pull paddings, and
    /// clears `current_room_id`. Room membership is untouched here — callers
    /// decide whether to call `Room::remove` (`leave_room`) or not
    /// (`force_leave_room`).
    async fn close_all_transports(&self) {
        let mut transports = self.transports.write().await;
        let count = transports.len();
        transports.clear();
        drop(transports);
        self.pull_paddings.write().await.clear();
        debug!(peer_id = %self.peer_id, transport_count = count, "peer transports closed");
    }

    /// Ordinary leave: closes transports and paddings, clears the room
    /// pointer. The caller (`Scheduler::leave_room`) removes the peer from
    /// the room's membership.
    pub async fn leave_room(&self) {
        self.close_all_transports().await;
        *self.current_room_id.write().await = None;
    }

    /// Kick/dismiss variant. Never panics; per-resource teardown failures
    /// are impossible to observe here since `mediasoup` resource close is
    /// infallible Drop, but kept as a distinct method so the caller's intent
    /// ("I already removed this peer from room membership") stays explicit.
    pub async fn force_leave_room(&self) {
        self.close_all_transports().await;
        *self.current_room_id.write().await = None;
    }

    pub async fn create_webrtc_transport(
        &self,
        router: &Router,
        settings: &roomcast_config::MediasoupSettings,
        direction: TransportDirection,
    ) -> SchedulerResult<WebRtcTransport> {
        let transport = create_webrtc_transport_on(router, settings)
            .await
            .map_err(media_err)?;

        let peer_transport = PeerTransport {
            direction,
            transport: AnyTransport::WebRtc(transport.clone()),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        };
        self.transports
            .write()
            .await
            .insert(transport.id(), peer_transport);

        debug!(peer_id = %self.peer_id, transport_id = %transport.id(), ?direction, "transport created");
        Ok(transport)
    }

    /// Plain transports carry no produce/consume surface of their own in
    /// this protocol (they exist for RTP taps external to a browser peer);
    /// recorded under the transport table purely so it shows up in stats and
    /// is torn down with the rest of the peer's resources on leave.
    pub async fn create_plain_transport(
        &self,
        router: &Router,
        settings: &roomcast_config::MediasoupSettings,
        comedia: bool,
    ) -> SchedulerResult<PlainTransport> {
        let transport = create_plain_transport_on(router, settings, comedia)
            .await
            .map_err(media_err)?;

        let peer_transport = PeerTransport {
            direction: TransportDirection::Recv,
            transport: AnyTransport::Plain(transport.clone()),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        };
        self.transports
            .write()
            .await
            .insert(transport.id(), peer_transport);

        debug!(peer_id = %self.peer_id, transport_id = %transport.id(), "plain transport created");
        Ok(transport)
    }

    pub async fn connect_webrtc_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> SchedulerResult<()> {
        let transports = self.transports.read().await;
        let entry = transports
            .get(&transport_id)
            .ok_or_else(|| SchedulerError::MediaBackendFailure("unknown transport".into()))?;

        match &entry.transport {
            AnyTransport::WebRtc(t) => {
                let t = t.clone();
                drop(transports);
                t.connect(WebRtcTransportRemoteParameters { dtls_parameters })
                    .await
                    .map_err(media_err)?;
            }
            AnyTransport::Plain(_) => {
                return Err(SchedulerError::MediaBackendFailure(
                    "connect is not supported on plain transports in this protocol".into(),
                ));
            }
        }

        debug!(peer_id = %self.peer_id, %transport_id, "transport connected");
        Ok(())
    }

    /// For each requested source: if `producer_peer` already has a matching
    /// producer, return it immediately; otherwise record a pull padding on
    /// `producer_peer` so `Produce` can discharge it later.
    ///
    /// The padding is recorded under a write lock on `producer_peer`'s own
    /// table before this call returns — guaranteeing the produce-then-consume
    /// ordering the Scheduler relies on even if `Produce` races in from
    /// another connection immediately after.
    pub async fn pull(
        producer_peer: &Peer,
        consumer_peer_id: &PeerId,
        req: &PullRequest,
    ) -> PullResult {
        let mut existing_producers = Vec::new();
        let mut produce_sources = Vec::new();

        let transports = producer_peer.transports.read().await;
        let mut still_pending: Vec<Source> = Vec::new();
        for source in &req.sources {
            let mut found = None;
            for pt in transports.values() {
                if let Some((pid, entry)) = pt.producers.iter().find(|(_, e)| &e.source == source) {
                    found = Some(pid.to_string());
                    let _ = entry;
                    break;
                }
            }
            match found {
                Some(producer_id) => existing_producers.push(ExistingProducer {
                    producer_id,
                    producer_peer_id: producer_peer.peer_id.clone(),
                    source: source.clone(),
                }),
                None => still_pending.push(source.clone()),
            }
        }
        drop(transports);

        if !still_pending.is_empty() {
            let mut paddings = producer_peer.pull_paddings.write().await;
            for source in still_pending {
                paddings.push(PullPadding {
                    consumer_peer_id: consumer_peer_id.clone(),
                    source: source.clone(),
                });
                produce_sources.push(source);
            }
        }

        PullResult {
            existing_producers,
            produce_sources,
        }
    }

    /// Creates a Producer on the named send transport, then discharges every
    /// pull padding matching `req.source`, returning them so the caller can
    /// issue the resulting `consume` calls on the waiting peers.
    ///
    /// `audio_observer` is wired in for audio producers so the room's
    /// active-speaker detection covers them; video producers skip it.
    pub async fn produce(
        &self,
        router: &Router,
        audio_observer: Option<&mediasoup::audio_level_observer::AudioLevelObserver>,
        req: &ProduceRequest,
    ) -> SchedulerResult<ProduceResult> {
        let transport_id: TransportId = req
            .transport_id
            .parse()
            .map_err(|_| SchedulerError::MediaBackendFailure("invalid transport id".into()))?;

        let mut transports = self.transports.write().await;
        let entry = transports
            .get_mut(&transport_id)
            .ok_or_else(|| SchedulerError::MediaBackendFailure("unknown transport".into()))?;
        if entry.direction != TransportDirection::Send {
            return Err(SchedulerError::MediaBackendFailure(
                "producer requested on a non-send transport".into(),
            ));
        }

        let webrtc = match &entry.transport {
            AnyTransport::WebRtc(t) => t.clone(),
            AnyTransport::Plain(_) => {
                return Err(SchedulerError::MediaBackendFailure(
                    "produce is not supported on plain transports in this protocol".into(),
                ));
            }
        };
        drop(transports);

        let mut options = ProducerOptions::new(req.kind, req.rtp_parameters.clone());
        options.app_data = mediasoup::data_structures::AppData::new(self.peer_id.clone());
        let producer = webrtc.produce(options).await.map_err(media_err)?;
        let producer_id = producer.id();

        if req.kind == mediasoup::rtp_parameters::MediaKind::Audio {
            if let Some(observer) = audio_observer {
                let add_options =
                    mediasoup::rtp_observer::RtpObserverAddProducerOptions::new(producer.id());
                if let Err(err) = observer.add_producer(add_options).await {
                    warn!(peer_id = %self.peer_id, %err, "failed to add producer to audio level observer");
                }
            }
        }
        let _ = router; // kept for signature symmetry with `consume`, which needs capability checks

        let mut transports = self.transports.write().await;
        if let Some(entry) = transports.get_mut(&transport_id) {
            entry.producers.insert(
                producer_id,
                ProducerEntry {
                    producer,
                    source: req.source.clone(),
                },
            );
        }
        drop(transports);

        let mut paddings = self.pull_paddings.write().await;
        let mut discharged = Vec::new();
        paddings.retain(|p| {
            if p.source == req.source {
                discharged.push(DischargedPull {
                    consumer_peer_id: p.consumer_peer_id.clone(),
                    source: p.source.clone(),
                });
                false
            } else {
                true
            }
        });
        drop(paddings);

        debug!(
            peer_id = %self.peer_id,
            %producer_id,
            source = %req.source,
            discharged = discharged.len(),
            "producer created"
        );

        Ok(ProduceResult {
            producer_id: producer_id.to_string(),
            discharged,
        })
    }

    /// Creates a Consumer on this peer's receive transport for a producer
    /// owned by `producer_peer`. Returns `None` (not an error) if this
    /// peer's capabilities can't consume it.
    pub async fn consume(
        &self,
        router: &Router,
        producer_peer: &Peer,
        transport_id: TransportId,
        producer_id: ProducerId,
    ) -> SchedulerResult<Option<ConsumerInfo>> {
        if !router.can_consume(&producer_id, &self.rtp_capabilities) {
            return Ok(None);
        }

        let mut transports = self.transports.write().await;
        let entry = transports
            .get_mut(&transport_id)
            .ok_or_else(|| SchedulerError::MediaBackendFailure("unknown transport".into()))?;
        if entry.direction != TransportDirection::Recv {
            return Err(SchedulerError::MediaBackendFailure(
                "consumer requested on a non-recv transport".into(),
            ));
        }
        let webrtc = match &entry.transport {
            AnyTransport::WebRtc(t) => t.clone(),
            AnyTransport::Plain(_) => {
                return Err(SchedulerError::MediaBackendFailure(
                    "consume is not supported on plain transports in this protocol".into(),
                ));
            }
        };
        drop(transports);

        let options = ConsumerOptions::new(producer_id, self.rtp_capabilities.clone());
        let consumer = webrtc.consume(options).await.map_err(media_err)?;
        let info = ConsumerInfo {
            consumer_id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
        };

        let mut transports = self.transports.write().await;
        if let Some(entry) = transports.get_mut(&transport_id) {
            entry.consumers.insert(consumer.id(), consumer);
        }
        drop(transports);

        let _ = producer_peer; // identifies the logical source for the caller's notification, not needed here
        debug!(peer_id = %self.peer_id, consumer_id = %info.consumer_id, "consumer created");
        Ok(Some(info))
    }

    /// Closes a producer by id. Idempotent: missing id returns `false`.
    pub async fn close_producer(&self, producer_id: &ProducerId) -> bool {
        let mut transports = self.transports.write().await;
        for pt in transports.values_mut() {
            if pt.producers.remove(producer_id).is_some() {
                return true;
            }
        }
        false
    }

    /// Closes every producer tagged with one of `sources`. Returns the ids
    /// closed.
    pub async fn close_producers_with_sources(&self, sources: &HashSet<Source>) -> Vec<ProducerId> {
        let mut closed = Vec::new();
        let mut transports = self.transports.write().await;
        for pt in transports.values_mut() {
            let matching: Vec<ProducerId> = pt
                .producers
                .iter()
                .filter(|(_, e)| sources.contains(&e.source))
                .map(|(id, _)| *id)
                .collect();
            for id in matching {
                pt.producers.remove(&id);
                closed.push(id);
            }
        }
        closed
    }

    pub async fn close_all_producers(&self) -> Vec<ProducerId> {
        let mut closed = Vec::new();
        let mut transports = self.transports.write().await;
        for pt in transports.values_mut() {
            closed.extend(pt.producers.keys().copied());
            pt.producers.clear();
        }
        closed
    }

    pub async fn pause_producer(&self, producer_id: &ProducerId) -> SchedulerResult<bool> {
        self.with_producer(producer_id, |p| async move {
            p.pause().await.map_err(media_err)
        })
        .await
    }

    pub async fn resume_producer(&self, producer_id: &ProducerId) -> SchedulerResult<bool> {
        self.with_producer(producer_id, |p| async move {
            p.resume().await.map_err(media_err)
        })
        .await
    }

    async fn with_producer<F, Fut>(&self, producer_id: &ProducerId, f: F) -> SchedulerResult<bool>
    where
        F: FnOnce(Producer) -> Fut,
        Fut: std::future::Future<Output = SchedulerResult<()>>,
    {
        let transports = self.transports.read().await;
        let producer = transports
            .values()
            .find_map(|pt| pt.producers.get(producer_id).map(|e| e.producer.clone()));
        drop(transports);

        match producer {
            Some(p) => {
                f(p).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn close_consumer(&self, consumer_id: &mediasoup::consumer::ConsumerId) -> bool {
        let mut transports = self.transports.write().await;
        for pt in transports.values_mut() {
            if pt.consumers.remove(consumer_id).is_some() {
                return true;
            }
        }
        false
    }

    pub async fn pause_consumer(&self, consumer_id: &mediasoup::consumer::ConsumerId) -> SchedulerResult<bool> {
        self.with_consumer(consumer_id, |c| async move { c.pause().await.map_err(media_err) })
            .await
    }

    pub async fn resume_consumer(&self, consumer_id: &mediasoup::consumer::ConsumerId) -> SchedulerResult<bool> {
        self.with_consumer(consumer_id, |c| async move { c.resume().await.map_err(media_err) })
            .await
    }

    pub async fn set_consumer_preferred_layers(
        &self,
        consumer_id: &mediasoup::consumer::ConsumerId,
        layers: mediasoup::consumer::ConsumerLayers,
    ) -> SchedulerResult<bool> {
        self.with_consumer(consumer_id, |c| async move {
            c.set_preferred_layers(layers).await.map_err(media_err)
        })
        .await
    }

    pub async fn set_consumer_priority(
        &self,
        consumer_id: &mediasoup::consumer::ConsumerId,
        priority: u8,
    ) -> SchedulerResult<bool> {
        self.with_consumer(consumer_id, |c| async move {
            c.set_priority(priority).await.map_err(media_err)
        })
        .await
    }

    pub async fn request_consumer_key_frame(&self, consumer_id: &mediasoup::consumer::ConsumerId) -> SchedulerResult<bool> {
        self.with_consumer(consumer_id, |c| async move {
            c.request_key_frame().await.map_err(media_err)
        })
        .await
    }

    async fn with_consumer<F, Fut>(
        &self,
        consumer_id: &mediasoup::consumer::ConsumerId,
        f: F,
    ) -> SchedulerResult<bool>
    where
        F: FnOnce(Consumer) -> Fut,
        Fut: std::future::Future<Output = SchedulerResult<()>>,
    {
        let transports = self.transports.read().await;
        let consumer = transports
            .values()
            .find_map(|pt| pt.consumers.get(consumer_id).cloned());
        drop(transports);

        match consumer {
            Some(c) => {
                f(c).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn restart_ice(&self, transport_id: &TransportId) -> SchedulerResult<Option<mediasoup::data_structures::IceParameters>> {
        let transports = self.transports.read().await;
        let entry = match transports.get(transport_id) {
            Some(e) => e,
            None => return Ok(None),
        };
        let webrtc = match &entry.transport {
            AnyTransport::WebRtc(t) => t.clone(),
            AnyTransport::Plain(_) => return Ok(None),
        };
        drop(transports);

        let params = webrtc.restart_ice().await.map_err(media_err)?;
        Ok(Some(params))
    }

    pub async fn snapshot_app_data(&self) -> HashMap<String, Value> {
        self.app_data.read().await.clone()
    }

    pub async fn snapshot_internal_data(&self) -> HashMap<String, Value> {
        self.internal_data.read().await.clone()
    }

    pub async fn role(&self) -> Option<String> {
        self.internal_data
            .read()
            .await
            .get("role")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    }

    pub async fn set_app_data(&self, key: String, value: Value) {
        self.app_data.write().await.insert(key, value);
    }

    pub async fn unset_app_data(&self, key: &str) {
        self.app_data.write().await.remove(key);
    }

    pub async fn clear_app_data(&self) {
        self.app_data.write().await.clear();
    }

    pub async fn set_internal_data(&self, key: String, value: Value) {
        self.internal_data.write().await.insert(key, value);
    }

    pub async fn unset_internal_data(&self, key: &str) {
        self.internal_data.write().await.remove(key);
    }

    pub async fn clear_internal_data(&self) {
        self.internal_data.write().await.clear();
    }

    pub async fn producer_source(&self, producer_id: &ProducerId) -> Option<Source> {
        let transports = self.transports.read().await;
        transports
            .values()
            .find_map(|pt| pt.producers.get(producer_id).map(|e| e.source.clone()))
    }

    /// All `(producer_id, source)` pairs this peer currently exposes, for
    /// building the "existing producers" list a newly joined peer receives.
    pub async fn list_producers(&self) -> Vec<(ProducerId, Source)> {
        let transports = self.transports.read().await;
        transports
            .values()
            .flat_map(|pt| pt.producers.iter().map(|(id, e)| (*id, e.source.clone())))
            .collect()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("connection_id", &self.connection_id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}
