//! A simulated player: playback truth synthesized from the wall clock.
//!
//! Position advances by elapsed time while playing and freezes on pause.
//! When the position reaches the track duration the backend synthesizes the
//! next track, emitting `MetadataChanged` followed by `PositionObserved(0)`.

use crate::{EventListeners, PlayerBackend};
use async_trait::async_trait;
use hudcast_core::{
    PlaybackStatus, PlayerError, PlayerEvent, PlayerSnapshot, PositionSource, TrackMetadata,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant};
use tracing::debug;

const TRACKS: &[(&str, &str, &str, u64)] = &[
    ("Summer Vibes", "The Mocking Birds", "Greatest Hits", 180),
    ("Winter Blues", "Dummy Data", "New Release", 240),
    ("Autumn Leaves", "Test Track", "Timeless Collection", 150),
    ("Spring Forward", "Mock Artists", "First Album", 210),
    ("Midnight Drive", "Placeholder Band", "The Mockup", 195),
    ("Morning Coffee", "The Simulators", "Testing 123", 165),
    ("Sunset Dreams", "Virtual Sound", "Demo Tracks", 225),
    ("Dawn Chorus", "Fake Records", "Sample Songs", 135),
];

fn track_at(index: usize) -> TrackMetadata {
    let (title, artist, album, duration_s) = TRACKS[index % TRACKS.len()];
    TrackMetadata {
        track_id: format!("track{}", index % TRACKS.len() + 1),
        title: title.to_string(),
        artist: artist.to_string(),
        album: Some(album.to_string()),
        artwork_url: Some(format!(
            "https://picsum.photos/seed/track{}/300/300",
            index % TRACKS.len() + 1
        )),
        duration_ms: Some(duration_s * 1_000),
    }
}

struct SimState {
    metadata: TrackMetadata,
    status: PlaybackStatus,
    /// Position committed at `anchor`; the live position adds the elapsed
    /// time since then while playing.
    position_ms: u64,
    anchor: Instant,
    track_index: usize,
}

impl SimState {
    fn live_position(&self) -> u64 {
        let raw = match self.status {
            PlaybackStatus::Playing => {
                self.position_ms + self.anchor.elapsed().as_millis() as u64
            }
            _ => self.position_ms,
        };
        self.metadata.clamp_position(raw)
    }

    fn at_track_end(&self) -> bool {
        match self.metadata.duration_ms {
            Some(duration) => {
                self.status == PlaybackStatus::Playing
                    && self.position_ms + self.anchor.elapsed().as_millis() as u64 >= duration
            }
            None => false,
        }
    }
}

pub struct SimulatedBackend {
    inner: Arc<SimInner>,
}

struct SimInner {
    state: Mutex<SimState>,
    listeners: EventListeners,
}

impl SimulatedBackend {
    /// Spawns the internal clock; must run inside a tokio runtime.
    pub fn new(tick_ms: u64) -> Self {
        let inner = Arc::new(SimInner {
            state: Mutex::new(SimState {
                metadata: track_at(0),
                status: PlaybackStatus::Playing,
                position_ms: 0,
                anchor: Instant::now(),
                track_index: 0,
            }),
            listeners: EventListeners::default(),
        });

        let tick = Arc::clone(&inner);
        tokio::spawn(async move {
            let period = Duration::from_millis(tick_ms.max(50));
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tick.on_tick();
            }
        });

        Self { inner }
    }
}

impl SimInner {
    fn on_tick(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status != PlaybackStatus::Playing {
            return;
        }
        if state.at_track_end() {
            self.advance_track(&mut state);
            return;
        }
        let position = state.live_position();
        state.position_ms = position;
        state.anchor = Instant::now();
        self.listeners.emit(PlayerEvent::PositionObserved {
            position_ms: position,
            source: PositionSource::Pushed,
        });
    }

    /// Synthesizes the next track and announces it.
    fn advance_track(&self, state: &mut MutexGuard<'_, SimState>) {
        state.track_index += 1;
        state.metadata = track_at(state.track_index);
        state.position_ms = 0;
        state.anchor = Instant::now();
        debug!(
            title = %state.metadata.title,
            artist = %state.metadata.artist,
            "simulated track change"
        );
        self.listeners
            .emit(PlayerEvent::MetadataChanged(state.metadata.clone()));
        self.listeners.emit(PlayerEvent::PositionObserved {
            position_ms: 0,
            source: PositionSource::Pushed,
        });
    }

    fn set_status(&self, status: PlaybackStatus) {
        let mut state = self.state.lock().unwrap();
        // Freeze (or re-anchor) the position before flipping the status so
        // elapsed time spent in the previous state is accounted once.
        let position = state.live_position();
        state.position_ms = position;
        state.anchor = Instant::now();
        state.status = status;
        drop(state);
        self.listeners.emit(PlayerEvent::StatusChanged(status));
    }
}

#[async_trait]
impl PlayerBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn subscribe(&self) -> UnboundedReceiver<PlayerEvent> {
        self.inner.listeners.subscribe()
    }

    async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerError> {
        let state = self.inner.state.lock().unwrap();
        Ok(PlayerSnapshot {
            metadata: Some(state.metadata.clone()),
            status: state.status,
            position_ms: state.live_position(),
            updated_at: SystemTime::now(),
        })
    }

    async fn position(&self) -> Result<u64, PlayerError> {
        Ok(self.inner.state.lock().unwrap().live_position())
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.inner.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.inner.set_status(PlaybackStatus::Paused);
        Ok(())
    }

    async fn next(&self) -> Result<(), PlayerError> {
        let mut state = self.inner.state.lock().unwrap();
        self.inner.advance_track(&mut state);
        Ok(())
    }

    async fn previous(&self) -> Result<(), PlayerError> {
        // The simulation keeps no history; previous synthesizes a fresh
        // track just like the next command.
        let mut state = self.inner.state.lock().unwrap();
        self.inner.advance_track(&mut state);
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> Result<(), PlayerError> {
        let mut state = self.inner.state.lock().unwrap();
        let clamped = state.metadata.clamp_position(position_ms);
        state.position_ms = clamped;
        state.anchor = Instant::now();
        drop(state);
        self.inner.listeners.emit(PlayerEvent::PositionObserved {
            position_ms: clamped,
            source: PositionSource::Pushed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    async fn drain(rx: &mut UnboundedReceiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn track_rolls_over_exactly_once_after_duration_elapses() {
        let backend = SimulatedBackend::new(500);
        let mut rx = backend.subscribe();

        // First track is 180s long; drive 181s of virtual time through the
        // internal clock.
        for _ in 0..362 {
            advance(Duration::from_millis(500)).await;
        }
        tokio::task::yield_now().await;

        let events = drain(&mut rx).await;
        let metadata_changes = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::MetadataChanged(_)))
            .count();
        let zero_positions = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::PositionObserved { position_ms: 0, .. }))
            .count();

        assert_eq!(metadata_changes, 1);
        assert_eq!(zero_positions, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn pause_freezes_position_at_pause_time() {
        let backend = SimulatedBackend::new(500);

        advance(Duration::from_secs(10)).await;
        backend.pause().await.unwrap();
        let frozen = backend.position().await.unwrap();

        advance(Duration::from_secs(30)).await;
        assert_eq!(backend.position().await.unwrap(), frozen);

        backend.play().await.unwrap();
        advance(Duration::from_secs(2)).await;
        assert!(backend.position().await.unwrap() > frozen);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn next_emits_metadata_then_position_zero() {
        let backend = SimulatedBackend::new(500);
        let mut rx = backend.subscribe();

        backend.next().await.unwrap();

        let events = drain(&mut rx).await;
        assert!(matches!(events[0], PlayerEvent::MetadataChanged(_)));
        assert!(matches!(
            events[1],
            PlayerEvent::PositionObserved { position_ms: 0, .. }
        ));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn seek_beyond_duration_is_clamped() {
        let backend = SimulatedBackend::new(500);
        backend.seek(999_000).await.unwrap();
        assert_eq!(backend.position().await.unwrap(), 180_000);
    }
}
