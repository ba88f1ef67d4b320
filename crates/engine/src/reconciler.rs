use crate::{RelayHub, StateCache};
use hudcast_backends::PlayerBackend;
use hudcast_core::{PlaybackStatus, PlayerEvent, PositionSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant, Interval};
use tracing::{debug, trace};

/// Resolves pushed and polled position observations into one canonical
/// stream and drives all cache mutation.
///
/// Every observed position is authoritative at the moment it arrives; a
/// value equal to the last emitted one is suppressed, and nothing is ever
/// extrapolated between samples. The sampling timer stops while the player
/// is not playing and fires immediately on resume.
pub struct PositionReconciler {
    backend: Arc<dyn PlayerBackend>,
    cache: Arc<StateCache>,
    hub: Arc<RelayHub>,
    poll_interval: Duration,
}

impl PositionReconciler {
    pub fn new(
        backend: Arc<dyn PlayerBackend>,
        cache: Arc<StateCache>,
        hub: Arc<RelayHub>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            hub,
            poll_interval,
        }
    }

    /// The sole writer into the state cache. Processes events strictly in
    /// arrival order; returns when the backend's event stream closes.
    pub async fn run(self, mut events: UnboundedReceiver<PlayerEvent>) {
        let mut last_emitted: Option<u64> = None;
        let mut sampling = true;
        let mut ticker = time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else {
                        debug!("backend event stream closed; stopping writer task");
                        break;
                    };
                    self.absorb(event, &mut last_emitted, &mut sampling, &mut ticker);
                }
                _ = ticker.tick(), if sampling => {
                    match self.backend.position().await {
                        Ok(position_ms) => {
                            let event = PlayerEvent::PositionObserved {
                                position_ms,
                                source: PositionSource::Polled,
                            };
                            self.absorb(event, &mut last_emitted, &mut sampling, &mut ticker);
                        }
                        Err(err) => trace!(error = %err, "position sample failed"),
                    }
                }
            }
        }
    }

    fn absorb(
        &self,
        event: PlayerEvent,
        last_emitted: &mut Option<u64>,
        sampling: &mut bool,
        ticker: &mut Interval,
    ) {
        match &event {
            PlayerEvent::PositionObserved { position_ms, .. } => {
                if *last_emitted == Some(*position_ms) {
                    trace!(position_ms, "suppressing duplicate position");
                    return;
                }
                *last_emitted = Some(*position_ms);
            }
            PlayerEvent::MetadataChanged(_) => {
                // A fresh track always fans out its first position, even if
                // the previous track happened to stop at the same value.
                *last_emitted = None;
            }
            PlayerEvent::StatusChanged(status) => {
                let was_sampling = *sampling;
                *sampling = *status == PlaybackStatus::Playing;
                if *sampling && !was_sampling {
                    // One immediate sample on resume instead of waiting a
                    // full interval.
                    ticker.reset_immediately();
                }
            }
        }

        let delta = self.cache.apply(&event);
        self.hub.publish(delta);
    }
}
