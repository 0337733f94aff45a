//! The MediaBackend boundary: a pool of `mediasoup` workers and the codec
//! table every Router is created with. Nothing in this module reimplements
//! RTP/ICE/DTLS — it only drives the real `mediasoup` async API.

use mediasoup::data_structures::ListenIp;
use mediasoup::plain_transport::{PlainTransport, PlainTransportOptions};
use mediasoup::router::Router;
use mediasoup::rtp_parameters::{MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtpCodecCapability, RtpCodecParametersParameters};
use mediasoup::webrtc_transport::{TransportListenIps, WebRtcTransport, WebRtcTransportOptions};
use mediasoup::worker::{Worker, WorkerSettings};
use mediasoup::worker_manager::WorkerManager;
use roomcast_config::MediasoupSettings;
use std::net::IpAddr;
use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

/// Pool of mediasoup workers with round-robin selection across rooms.
pub struct WorkerPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl WorkerPool {
    pub async fn new(settings: &MediasoupSettings) -> anyhow::Result<Self> {
        let worker_manager = WorkerManager::new();
        let mut workers = Vec::with_capacity(settings.num_workers as usize);

        for i in 0..settings.num_workers {
            let mut worker_settings = WorkerSettings::default();
            worker_settings.rtc_port_range = settings.rtc_min_port..=settings.rtc_max_port;

            let worker = worker_manager
                .create_worker(worker_settings)
                .await
                .map_err(|e| anyhow::anyhow!("failed to create mediasoup worker {i}: {e}"))?;

            let worker_id = worker.id();
            worker
                .on_dead(move |reason| {
                    error!(?reason, %worker_id, "mediasoup worker died");
                })
                .detach();

            info!(worker_id = %worker.id(), index = i, "mediasoup worker created");
            workers.push(worker);
        }

        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next worker using round-robin selection.
    pub fn get_worker(&self) -> &Worker {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[idx]
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Standard SFU media codecs: Opus audio + VP8/H264 video.
pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: Some(111),
            clock_rate: NonZero::new(48000).unwrap(),
            channels: NonZero::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: Some(96),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: Some(125),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("level-asymmetry-allowed", 1_u32.into()),
                ("packetization-mode", 1_u32.into()),
                ("profile-level-id", "42e01f".into()),
            ]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}

fn listen_ip(settings: &MediasoupSettings) -> anyhow::Result<ListenIp> {
    Ok(ListenIp {
        ip: settings
            .listen_ip
            .parse::<IpAddr>()
            .map_err(|e| anyhow::anyhow!("invalid mediasoup listen_ip {:?}: {e}", settings.listen_ip))?,
        announced_ip: if settings.announced_ip.is_empty() {
            None
        } else {
            Some(
                settings
                    .announced_ip
                    .parse::<IpAddr>()
                    .map_err(|e| anyhow::anyhow!("invalid mediasoup announced_ip {:?}: {e}", settings.announced_ip))?,
            )
        },
    })
}

/// Creates a WebRtcTransport on `router` using the configured listen ip /
/// announced ip / port range. Shared by every place a Peer needs a new send
/// or receive transport.
pub async fn create_webrtc_transport_on(
    router: &Router,
    settings: &MediasoupSettings,
) -> anyhow::Result<WebRtcTransport> {
    let mut options = WebRtcTransportOptions::new(TransportListenIps::new(listen_ip(settings)?));
    options.enable_sctp = true;

    router
        .create_webrtc_transport(options)
        .await
        .map_err(|e| anyhow::anyhow!("create_webrtc_transport failed: {e}"))
}

/// Creates a PlainTransport on `router`, used for RTP taps (a recording
/// pipeline or an external media bridge) rather than a browser peer.
pub async fn create_plain_transport_on(
    router: &Router,
    settings: &MediasoupSettings,
    comedia: bool,
) -> anyhow::Result<PlainTransport> {
    let mut options = PlainTransportOptions::new(listen_ip(settings)?);
    options.comedia = comedia;

    router
        .create_plain_transport(options)
        .await
        .map_err(|e| anyhow::anyhow!("create_plain_transport failed: {e}"))
}
