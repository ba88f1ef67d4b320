pub mod config;
pub mod error;
pub mod model;
pub mod protocol;

pub use config::{AppConfig, ConfigIntervals, ListenConfig, MprisConfig};
pub use error::PlayerError;
pub use model::{
    PlaybackStatus, PlayerCommand, PlayerEvent, PlayerSnapshot, PositionSource, TrackMetadata,
};
pub use protocol::{ClientMessage, CommandError, ServerMessage};
