use roomcast_api::{build_router, state::AppState};
use roomcast_config::Settings;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// A running test server bound to a random local port, with its own
/// in-process mediasoup worker pool — no external services required.
pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub settings: Settings,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_settings(|_| {}).await
    }

    /// Spawn with customized settings. The `mutator` runs after test defaults
    /// are applied, so callers can tweak e.g. `dismiss_drain_ms` for faster
    /// dismissal tests.
    pub async fn spawn_with_settings(mutator: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = test_settings();
        mutator(&mut settings);

        let app_state = AppState::new(settings.clone())
            .await
            .expect("failed to create AppState");
        let app = build_router(app_state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = format!("http://{}", addr);

        Self {
            addr,
            base_url,
            settings,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn ws_url(&self, peer_id: &str, connection_id: &str) -> String {
        format!(
            "ws://{}/ws?peer_id={}&connection_id={}",
            self.addr, peer_id, connection_id
        )
    }
}

fn test_settings() -> Settings {
    Settings {
        app: roomcast_config::AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
        },
        mediasoup: roomcast_config::MediasoupSettings {
            num_workers: 1,
            listen_ip: "127.0.0.1".to_string(),
            announced_ip: String::new(),
            rtc_min_port: 40000,
            rtc_max_port: 40999,
        },
        room: roomcast_config::RoomSettings {
            default_name: "Default".to_string(),
            audio_level_max_entries: 8,
            audio_level_threshold: -70,
            audio_level_interval_ms: 800,
            dismiss_drain_ms: 5,
        },
        log: roomcast_config::LogSettings {
            filter: "roomcast_api=debug,roomcast_core=debug".to_string(),
        },
    }
}
