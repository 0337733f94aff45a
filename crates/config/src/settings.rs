use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub mediasoup: MediasoupSettings,
    pub room: RoomSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediasoupSettings {
    pub num_workers: u32,
    pub listen_ip: String,
    pub announced_ip: String,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

/// Per-room defaults: audio-level observer tuning and the host-dismissal
/// drain barrier (see scheduler::dismiss_room).
#[derive(Debug, Deserialize, Clone)]
pub struct RoomSettings {
    pub default_name: String,
    pub audio_level_max_entries: u16,
    pub audio_level_threshold: i8,
    pub audio_level_interval_ms: u16,
    pub dismiss_drain_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub filter: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("ROOMCAST"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("mediasoup.num_workers", 2)?
            .set_default("mediasoup.listen_ip", "0.0.0.0")?
            .set_default("mediasoup.announced_ip", "127.0.0.1")?
            .set_default("mediasoup.rtc_min_port", 40000)?
            .set_default("mediasoup.rtc_max_port", 49999)?
            .set_default("room.default_name", "Default")?
            .set_default("room.audio_level_max_entries", 8)?
            .set_default("room.audio_level_threshold", -70)?
            .set_default("room.audio_level_interval_ms", 800)?
            .set_default("room.dismiss_drain_ms", 100)?
            .set_default("log.filter", "roomcast_api=debug,roomcast_core=debug,tower_http=debug")?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
