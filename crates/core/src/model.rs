use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Playback state of the relayed player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackStatus::Playing => write!(f, "Playing"),
            PlaybackStatus::Paused => write!(f, "Paused"),
            PlaybackStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Metadata for one track. Replaced wholesale on track change, never
/// patched field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    /// Opaque backend-specific identifier (an MPRIS track object path,
    /// or a synthesized id for the simulated backend).
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    pub duration_ms: Option<u64>,
}

impl TrackMetadata {
    /// Clamps a position into `[0, duration]` when the duration is known.
    pub fn clamp_position(&self, position_ms: u64) -> u64 {
        match self.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        }
    }
}

/// Immutable copy of the full player state at a point in time. Observers
/// always receive copies of this, never references into live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub metadata: Option<TrackMetadata>,
    pub status: PlaybackStatus,
    pub position_ms: u64,
    pub updated_at: SystemTime,
}

impl PlayerSnapshot {
    pub fn empty() -> Self {
        Self {
            metadata: None,
            status: PlaybackStatus::Stopped,
            position_ms: 0,
            updated_at: SystemTime::now(),
        }
    }
}

/// Where a position observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSource {
    /// Delivered by a backend change notification.
    Pushed,
    /// Obtained by the periodic sampling timer.
    Polled,
}

/// Normalized event stream produced by every backend variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    MetadataChanged(TrackMetadata),
    StatusChanged(PlaybackStatus),
    PositionObserved {
        position_ms: u64,
        source: PositionSource,
    },
}

/// A control request issued by an observer. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Next,
    Previous,
    Seek { position_ms: u64 },
}

impl PlayerCommand {
    /// Wire-level name, used when reporting a failure back to the issuer.
    pub fn name(&self) -> &'static str {
        match self {
            PlayerCommand::Play => "play",
            PlayerCommand::Pause => "pause",
            PlayerCommand::Next => "next",
            PlayerCommand::Previous => "previous",
            PlayerCommand::Seek { .. } => "seek",
        }
    }
}
