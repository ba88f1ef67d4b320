//! Wire protocol spoken over the observer transport.
//!
//! Both directions carry JSON text frames of the shape
//! `{"event": <name>, "data": <payload>}`; `data` is omitted for events
//! that carry none.

use crate::model::{PlaybackStatus, PlayerSnapshot, TrackMetadata};
use serde::{Deserialize, Serialize};

/// Outbound frames, relay to observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    Metadata(Option<TrackMetadata>),
    Position(u64),
    PlaybackState(PlaybackStatus),
    FriendlyName(String),
    Error(CommandError),
}

impl ServerMessage {
    /// The three frames sent to a freshly joined observer, in the order the
    /// original transport emits them.
    pub fn snapshot_frames(snapshot: &PlayerSnapshot) -> [ServerMessage; 3] {
        [
            ServerMessage::Metadata(snapshot.metadata.clone()),
            ServerMessage::PlaybackState(snapshot.status),
            ServerMessage::Position(snapshot.position_ms),
        ]
    }
}

/// A command failure reported to the issuing observer only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub command: String,
    pub message: String,
}

/// Inbound frames, observer to relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Play,
    Pause,
    Next,
    Previous,
    Seek(u64),
    GetMetadata,
    GetPosition,
    GetPlaybackState,
    FriendlyName,
}

#[cfg(test)]
mod tests {
    use super::{ClientMessage, ServerMessage};
    use crate::model::PlaybackStatus;

    #[test]
    fn inbound_events_use_wire_names() {
        let play: ClientMessage = serde_json::from_str(r#"{"event":"play"}"#).unwrap();
        assert_eq!(play, ClientMessage::Play);

        let seek: ClientMessage =
            serde_json::from_str(r#"{"event":"seek","data":30000}"#).unwrap();
        assert_eq!(seek, ClientMessage::Seek(30_000));

        let get: ClientMessage = serde_json::from_str(r#"{"event":"getPlaybackState"}"#).unwrap();
        assert_eq!(get, ClientMessage::GetPlaybackState);
    }

    #[test]
    fn seek_without_position_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"seek"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"seek","data":"soon"}"#).is_err());
    }

    #[test]
    fn outbound_frames_round_trip() {
        let frame = ServerMessage::PlaybackState(PlaybackStatus::Paused);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"event":"playbackState","data":"Paused"}"#);

        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn position_frame_is_plain_milliseconds() {
        let json = serde_json::to_string(&ServerMessage::Position(42_500)).unwrap();
        assert_eq!(json, r#"{"event":"position","data":42500}"#);
    }
}
