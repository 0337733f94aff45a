//! Session-orchestration core for a selective forwarding unit: peers join,
//! form rooms, pull/produce/consume media through `mediasoup`, and a room's
//! host can dismiss it. This crate has no transport dependency of its own —
//! it depends on `mediasoup` for the media plane and on the `ClientChannel`
//! trait for notifying connections, leaving WebSocket/HTTP hosting to the
//! crate that embeds it.

pub mod error;
pub mod media;
pub mod notify;
pub mod peer;
pub mod room;
pub mod scheduler;
pub mod types;

pub use error::{SchedulerError, SchedulerResult};
pub use notify::{ClientChannel, NullChannel, Notification};
pub use peer::Peer;
pub use room::Room;
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConnectWebRtcTransportRequest, ConsumeRequest, CreateWebRtcTransportRequest, JoinRequest,
        JoinRoomRequest, ProduceRequest, PullRequest,
    };
    use mediasoup::rtp_parameters::{
        MediaKind, MimeTypeAudio, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
        RtpCodecParametersParameters, RtpEncodingParameters, RtpParameters,
    };
    use roomcast_config::Settings;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Captures every notification sent to a peer for assertions.
    struct RecordingChannel {
        received: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ClientChannel for RecordingChannel {
        async fn notify(&self, notification: Notification) {
            self.received.lock().unwrap().push(notification.kind.to_string());
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::load().unwrap_or_else(|_| default_test_settings());
        settings.mediasoup.num_workers = 1;
        settings.room.dismiss_drain_ms = 5;
        settings
    }

    fn default_test_settings() -> Settings {
        // Falls back to programmatic defaults when no config/ files are
        // present (e.g. under `cargo test` from a clean checkout).
        serde_json::from_value(serde_json::json!({
            "app": { "host": "0.0.0.0", "port": 3000, "cors_origins": [] },
            "mediasoup": {
                "num_workers": 1,
                "listen_ip": "127.0.0.1",
                "announced_ip": "",
                "rtc_min_port": 40000,
                "rtc_max_port": 40999
            },
            "room": {
                "default_name": "Default",
                "audio_level_max_entries": 8,
                "audio_level_threshold": -70,
                "audio_level_interval_ms": 800,
                "dismiss_drain_ms": 5
            },
            "log": { "filter": "roomcast_core=debug" }
        }))
        .expect("static default settings must deserialize")
    }

    fn dummy_rtp_capabilities() -> RtpCapabilities {
        RtpCapabilities {
            codecs: vec![RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: Some(111),
                clock_rate: std::num::NonZero::new(48000).unwrap(),
                channels: std::num::NonZero::new(2).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            }],
            header_extensions: vec![],
        }
    }

    fn dummy_rtp_parameters() -> RtpParameters {
        RtpParameters {
            mid: None,
            codecs: vec![RtpCodecParameters::Audio {
                mime_type: MimeTypeAudio::Opus,
                payload_type: 111,
                clock_rate: std::num::NonZero::new(48000).unwrap(),
                channels: std::num::NonZero::new(2).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            }],
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(11111111),
                ..Default::default()
            }],
            rtcp: Default::default(),
        }
    }

    async fn join(scheduler: &Scheduler, peer_id: &str) -> Arc<RecordingChannel> {
        let channel = RecordingChannel::new();
        scheduler
            .join(
                peer_id.to_string(),
                format!("conn-{peer_id}"),
                JoinRequest {
                    display_name: peer_id.to_string(),
                    rtp_capabilities: dummy_rtp_capabilities(),
                    sctp_capabilities: None,
                    sources: HashSet::new(),
                    app_data: HashMap::new(),
                },
                channel.clone(),
            )
            .await
            .expect("join should succeed");
        channel
    }

    #[tokio::test]
    async fn join_twice_with_same_connection_is_idempotent() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "alice").await;
        join(&scheduler, "alice").await;
    }

    #[tokio::test]
    async fn join_twice_with_different_connection_is_rejected() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        let channel = RecordingChannel::new();
        scheduler
            .join(
                "alice".to_string(),
                "conn-1".to_string(),
                JoinRequest {
                    display_name: "Alice".to_string(),
                    rtp_capabilities: dummy_rtp_capabilities(),
                    sctp_capabilities: None,
                    sources: HashSet::new(),
                    app_data: HashMap::new(),
                },
                channel,
            )
            .await
            .unwrap();

        let other_channel = RecordingChannel::new();
        let err = scheduler
            .join(
                "alice".to_string(),
                "conn-2".to_string(),
                JoinRequest {
                    display_name: "Alice".to_string(),
                    rtp_capabilities: dummy_rtp_capabilities(),
                    sctp_capabilities: None,
                    sources: HashSet::new(),
                    app_data: HashMap::new(),
                },
                other_channel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::AlreadyJoined { .. }));
    }

    #[tokio::test]
    async fn first_joiner_becomes_host_and_second_joiner_does_not_recreate_room() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "host").await;
        join(&scheduler, "guest").await;

        let (snapshot, created) = scheduler
            .join_room(
                &"host".to_string(),
                JoinRoomRequest {
                    room_id: "room-1".to_string(),
                    room_name: None,
                },
            )
            .await
            .unwrap();
        assert!(created);
        assert_eq!(snapshot.host_peer_id.as_deref(), Some("host"));

        let (_snapshot, created_again) = scheduler
            .join_room(
                &"guest".to_string(),
                JoinRoomRequest {
                    room_id: "room-1".to_string(),
                    room_name: None,
                },
            )
            .await
            .unwrap();
        assert!(!created_again);
    }

    #[tokio::test]
    async fn pull_before_produce_records_a_padding_and_produce_discharges_it() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "host").await;
        join(&scheduler, "guest").await;

        scheduler
            .join_room(&"host".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();
        scheduler
            .join_room(&"guest".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();

        let pull_result = scheduler
            .pull(
                &"guest".to_string(),
                PullRequest {
                    producer_peer_id: "host".to_string(),
                    sources: vec!["mic".to_string()],
                },
            )
            .await
            .unwrap();
        assert!(pull_result.existing_producers.is_empty());
        assert_eq!(pull_result.produce_sources, vec!["mic".to_string()]);

        let transport = scheduler
            .create_webrtc_transport(&"host".to_string(), CreateWebRtcTransportRequest { force_tcp: false })
            .await
            .unwrap();

        let produce_result = scheduler
            .produce(
                &"host".to_string(),
                ProduceRequest {
                    transport_id: transport.id().to_string(),
                    kind: MediaKind::Audio,
                    rtp_parameters: dummy_rtp_parameters(),
                    source: "mic".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(produce_result.discharged.len(), 1);
        assert_eq!(produce_result.discharged[0].consumer_peer_id, "guest");
    }

    #[tokio::test]
    async fn host_leave_dismisses_room_and_notifies_guest() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "host").await;
        let guest_channel = join(&scheduler, "guest").await;

        scheduler
            .join_room(&"host".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();
        scheduler
            .join_room(&"guest".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();

        scheduler.leave_room(&"host".to_string()).await.unwrap();

        assert!(scheduler.room_snapshot(&"room-1".to_string()).await.is_err());
        assert!(guest_channel.kinds().contains(&"room_dismissed".to_string()));
    }

    #[tokio::test]
    async fn kick_peer_removes_target_but_keeps_room_open() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "host").await;
        let guest_channel = join(&scheduler, "guest").await;

        scheduler
            .join_room(&"host".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();
        scheduler
            .join_room(&"guest".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();

        scheduler
            .kick_peer(&"room-1".to_string(), &"host".to_string(), &"guest".to_string())
            .await
            .unwrap();

        assert!(guest_channel.kinds().contains(&"kicked".to_string()));
        let snapshot = scheduler.room_snapshot(&"room-1".to_string()).await.unwrap();
        assert_eq!(snapshot.peers.len(), 1);
    }

    #[tokio::test]
    async fn kick_self_is_rejected() {
        let scheduler = Scheduler::new(test_settings()).await.expect("scheduler init");
        join(&scheduler, "host").await;
        scheduler
            .join_room(&"host".to_string(), JoinRoomRequest { room_id: "room-1".to_string(), room_name: None })
            .await
            .unwrap();

        let err = scheduler
            .kick_peer(&"room-1".to_string(), &"host".to_string(), &"host".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::CannotKickSelf));
    }
}
