use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIntervals {
    /// Fallback position sampling period while the player is playing.
    pub position_poll_ms: u64,
    /// Internal clock tick of the simulated backend.
    pub sim_tick_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            position_poll_ms: 1_000,
            sim_tick_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    /// Display name handed to observers and to an external service
    /// advertiser; the relay itself does not advertise.
    pub friendly_name: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            friendly_name: "hudcast player".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MprisConfig {
    pub service_name: String,
    pub object_path: String,
}

impl Default for MprisConfig {
    fn default() -> Self {
        Self {
            service_name: "org.mpris.MediaPlayer2.spotify".to_string(),
            object_path: "/org/mpris/MediaPlayer2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schema_version: u32,
    /// Backend variant: "mpris" or "simulated".
    pub backend: String,
    pub log_level: String,
    /// Bounded outbound queue length per observer; a saturated queue drops
    /// that observer instead of backpressuring the event source.
    pub observer_queue_len: usize,
    pub listen: ListenConfig,
    pub mpris: MprisConfig,
    pub intervals: ConfigIntervals,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            backend: "mpris".to_string(),
            log_level: "info".to_string(),
            observer_queue_len: 64,
            listen: ListenConfig::default(),
            mpris: MprisConfig::default(),
            intervals: ConfigIntervals::default(),
        }
    }
}
