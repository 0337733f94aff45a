//! Request/response DTOs crossing the Scheduler boundary. These mirror the
//! `*Request` vocabulary named in the client-channel protocol; the hosting
//! layer deserializes client JSON straight into these.

use mediasoup::consumer::ConsumerLayers;
use mediasoup::data_structures::DtlsParameters;
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::sctp_parameters::SctpCapabilities;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub type PeerId = String;
pub type RoomId = String;
pub type ConnectionId = String;
pub type Source = String;

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
    pub rtp_capabilities: RtpCapabilities,
    #[serde(default)]
    pub sctp_capabilities: Option<SctpCapabilities>,
    #[serde(default)]
    pub sources: HashSet<Source>,
    #[serde(default)]
    pub app_data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    #[serde(default)]
    pub room_name: Option<String>,
}

/// Snapshot of a room's membership, returned by `joinRoom` (including on the
/// idempotent re-join path).
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub name: String,
    pub host_peer_id: Option<PeerId>,
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub display_name: String,
    pub sources: HashSet<Source>,
    pub app_data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportDirection {
    Send,
    Recv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebRtcTransportRequest {
    #[serde(default)]
    pub force_tcp: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectWebRtcTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: DtlsParameters,
}

/// Plain transports skip ICE/DTLS negotiation entirely (no `connect` step);
/// `comedia` tells mediasoup to learn the remote RTP/RTCP tuple from the
/// first packet it receives instead of requiring it up front.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlainTransportRequest {
    #[serde(default = "default_comedia")]
    pub comedia: bool,
}

fn default_comedia() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub producer_peer_id: PeerId,
    pub sources: Vec<Source>,
}

/// Result of `Peer::pull`: producers the caller can consume right away, and
/// sources the producer peer still needs to start producing.
#[derive(Debug, Clone, Serialize)]
pub struct PullResult {
    pub existing_producers: Vec<ExistingProducer>,
    pub produce_sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExistingProducer {
    pub producer_id: String,
    pub producer_peer_id: PeerId,
    pub source: Source,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub source: Source,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProduceResult {
    pub producer_id: String,
    /// Pending pulls discharged by this produce call; the caller issues the
    /// resulting `consume` on each `consumer_peer_id`.
    pub discharged: Vec<DischargedPull>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DischargedPull {
    pub consumer_peer_id: PeerId,
    pub source: Source,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeRequest {
    pub transport_id: String,
    pub producer_peer_id: PeerId,
    pub producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetConsumerPreferredLayersRequest {
    pub consumer_id: String,
    pub spatial_layer: u8,
    #[serde(default)]
    pub temporal_layer: Option<u8>,
}

impl SetConsumerPreferredLayersRequest {
    pub fn layers(&self) -> ConsumerLayers {
        ConsumerLayers {
            spatial_layer: self.spatial_layer,
            temporal_layer: self.temporal_layer,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetConsumerPriorityRequest {
    pub consumer_id: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveRoomResult {
    pub peer_id: PeerId,
    pub sibling_peer_ids: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DismissRoomResult {
    pub room_id: RoomId,
    pub host_peer_id: PeerId,
    pub other_peer_ids: Vec<PeerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KickPeerResult {
    pub room_id: RoomId,
    pub target_peer_id: PeerId,
    pub sibling_peer_ids: Vec<PeerId>,
}
