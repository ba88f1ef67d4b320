use hudcast_core::{PlaybackStatus, PlayerEvent, PlayerSnapshot, ServerMessage, TrackMetadata};
use std::sync::RwLock;
use std::time::SystemTime;

struct CacheState {
    metadata: Option<TrackMetadata>,
    status: PlaybackStatus,
    position_ms: u64,
    updated_at: SystemTime,
}

/// Last-known player state. Single writer (the reconciler task), many
/// readers; readers only ever get owned [`PlayerSnapshot`] copies.
pub struct StateCache {
    state: RwLock<CacheState>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                metadata: None,
                status: PlaybackStatus::Stopped,
                position_ms: 0,
                updated_at: SystemTime::now(),
            }),
        }
    }

    /// Applies one well-formed event and returns the delta frame to fan
    /// out. Never fails: a metadata change replaces the track wholesale and
    /// resets the position, status and position changes replace only their
    /// own field.
    pub fn apply(&self, event: &PlayerEvent) -> ServerMessage {
        let mut state = self.state.write().unwrap();
        state.updated_at = SystemTime::now();
        match event {
            PlayerEvent::MetadataChanged(metadata) => {
                state.metadata = Some(metadata.clone());
                state.position_ms = 0;
                ServerMessage::Metadata(state.metadata.clone())
            }
            PlayerEvent::StatusChanged(status) => {
                state.status = *status;
                ServerMessage::PlaybackState(*status)
            }
            PlayerEvent::PositionObserved { position_ms, .. } => {
                let clamped = state
                    .metadata
                    .as_ref()
                    .map_or(*position_ms, |m| m.clamp_position(*position_ms));
                state.position_ms = clamped;
                ServerMessage::Position(clamped)
            }
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let state = self.state.read().unwrap();
        PlayerSnapshot {
            metadata: state.metadata.clone(),
            status: state.status,
            position_ms: state.position_ms,
            updated_at: state.updated_at,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.state
            .read()
            .unwrap()
            .metadata
            .as_ref()
            .and_then(|m| m.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::StateCache;
    use hudcast_core::{PlaybackStatus, PlayerEvent, PositionSource, TrackMetadata};

    fn track(id: &str, duration_ms: u64) -> TrackMetadata {
        TrackMetadata {
            track_id: id.to_string(),
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: None,
            artwork_url: None,
            duration_ms: Some(duration_ms),
        }
    }

    fn observed(position_ms: u64) -> PlayerEvent {
        PlayerEvent::PositionObserved {
            position_ms,
            source: PositionSource::Pushed,
        }
    }

    #[test]
    fn snapshot_reflects_every_mutation_in_order() {
        let cache = StateCache::new();
        cache.apply(&PlayerEvent::MetadataChanged(track("t1", 180_000)));
        cache.apply(&PlayerEvent::StatusChanged(PlaybackStatus::Playing));
        cache.apply(&observed(42_000));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.metadata.unwrap().track_id, "t1");
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
        assert_eq!(snapshot.position_ms, 42_000);
    }

    #[test]
    fn metadata_change_resets_position_to_zero() {
        let cache = StateCache::new();
        cache.apply(&PlayerEvent::MetadataChanged(track("t1", 180_000)));
        cache.apply(&observed(90_000));
        cache.apply(&PlayerEvent::MetadataChanged(track("t2", 200_000)));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.metadata.unwrap().track_id, "t2");
        assert_eq!(snapshot.position_ms, 0);
    }

    #[test]
    fn status_change_leaves_metadata_and_position_alone() {
        let cache = StateCache::new();
        cache.apply(&PlayerEvent::MetadataChanged(track("t1", 180_000)));
        cache.apply(&observed(10_000));
        cache.apply(&PlayerEvent::StatusChanged(PlaybackStatus::Paused));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.position_ms, 10_000);
        assert!(snapshot.metadata.is_some());
    }

    #[test]
    fn observed_positions_are_clamped_to_track_duration() {
        let cache = StateCache::new();
        cache.apply(&PlayerEvent::MetadataChanged(track("t1", 180_000)));
        cache.apply(&observed(181_500));
        assert_eq!(cache.snapshot().position_ms, 180_000);
    }
}
