use crate::{CommandDispatcher, StateCache};
use hudcast_core::{PlayerCommand, PlayerError, PlayerSnapshot, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
    Receiver, Sender,
};
use tracing::{info, warn};

/// Tracks the live observer set and guarantees each observer receives the
/// current snapshot at subscribe time followed by every subsequent delta,
/// in cache mutation order.
///
/// Delivery is best-effort and non-blocking per observer: each observer has
/// a bounded outbound queue, and a queue that saturates drops that observer
/// instead of backpressuring the event source or stalling its peers.
pub struct RelayHub {
    cache: Arc<StateCache>,
    dispatcher: CommandDispatcher,
    observers: Mutex<HashMap<u64, Sender<ServerMessage>>>,
    next_id: AtomicU64,
    queue_len: usize,
}

impl RelayHub {
    pub fn new(cache: Arc<StateCache>, dispatcher: CommandDispatcher, queue_len: usize) -> Self {
        Self {
            cache,
            dispatcher,
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            // The snapshot frames queued at join must always fit.
            queue_len: queue_len.max(4),
        }
    }

    /// Registers a new observer. The three snapshot frames are queued
    /// before the observer becomes eligible for fan-out, so there is no gap
    /// and no torn snapshot between join and the first delta.
    pub fn subscribe(self: &Arc<Self>) -> ObserverHandle {
        let (tx, rx) = mpsc::channel(self.queue_len);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = self.observers.lock().unwrap();
        let snapshot = self.cache.snapshot();
        for frame in ServerMessage::snapshot_frames(&snapshot) {
            let _ = tx.try_send(frame);
        }
        observers.insert(id, tx);
        drop(observers);

        info!(observer = id, "observer subscribed");
        ObserverHandle {
            id,
            events: rx,
            hub: Arc::clone(self),
        }
    }

    /// Fans one delta out to every live observer.
    pub fn publish(&self, message: ServerMessage) {
        let mut overflowed = Vec::new();
        let mut observers = self.observers.lock().unwrap();
        observers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                overflowed.push(*id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        drop(observers);

        for id in overflowed {
            warn!(
                observer = id,
                error = %PlayerError::ObserverOverflow,
                "dropping observer"
            );
        }
    }

    /// Delivers a frame to a single observer, e.g. a `get*` response or a
    /// command error. Overflow is handled the same way as for fan-out.
    pub fn send_to(&self, id: u64, message: ServerMessage) {
        let mut observers = self.observers.lock().unwrap();
        if let Some(tx) = observers.get(&id) {
            match tx.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    observers.remove(&id);
                    drop(observers);
                    warn!(
                        observer = id,
                        error = %PlayerError::ObserverOverflow,
                        "dropping observer"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    observers.remove(&id);
                }
            }
        }
    }

    /// Routes an observer command to the dispatcher. The result goes only
    /// to the caller; it is never broadcast.
    pub async fn command(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.dispatcher.dispatch(command).await
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.cache.snapshot()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    fn unsubscribe(&self, id: u64) {
        if self.observers.lock().unwrap().remove(&id).is_some() {
            info!(observer = id, "observer disconnected");
        }
    }
}

/// One observer's registration. Dropping the handle is the terminal
/// disconnect: it clears only this observer's own registration.
pub struct ObserverHandle {
    id: u64,
    events: Receiver<ServerMessage>,
    hub: Arc<RelayHub>,
}

impl ObserverHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next outbound frame; `None` once the hub has dropped
    /// this observer and the backlog is drained.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<ServerMessage, TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::RelayHub;
    use crate::{CommandDispatcher, StateCache};
    use async_trait::async_trait;
    use hudcast_backends::PlayerBackend;
    use hudcast_core::{
        PlaybackStatus, PlayerError, PlayerEvent, PlayerSnapshot, ServerMessage, TrackMetadata,
    };
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct UnavailableBackend;

    #[async_trait]
    impl PlayerBackend for UnavailableBackend {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        fn subscribe(&self) -> UnboundedReceiver<PlayerEvent> {
            tokio::sync::mpsc::unbounded_channel().1
        }
        async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn position(&self) -> Result<u64, PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn play(&self) -> Result<(), PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn pause(&self) -> Result<(), PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn next(&self) -> Result<(), PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn previous(&self) -> Result<(), PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
        async fn seek(&self, _position_ms: u64) -> Result<(), PlayerError> {
            Err(PlayerError::AdapterUnavailable)
        }
    }

    /// Connected backend that has no current track context, so every seek
    /// fails its precondition.
    struct NoTrackBackend;

    #[async_trait]
    impl PlayerBackend for NoTrackBackend {
        fn name(&self) -> &'static str {
            "no-track"
        }
        fn subscribe(&self) -> UnboundedReceiver<PlayerEvent> {
            tokio::sync::mpsc::unbounded_channel().1
        }
        async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerError> {
            Ok(PlayerSnapshot::empty())
        }
        async fn position(&self) -> Result<u64, PlayerError> {
            Ok(0)
        }
        async fn play(&self) -> Result<(), PlayerError> {
            Ok(())
        }
        async fn pause(&self) -> Result<(), PlayerError> {
            Ok(())
        }
        async fn next(&self) -> Result<(), PlayerError> {
            Ok(())
        }
        async fn previous(&self) -> Result<(), PlayerError> {
            Ok(())
        }
        async fn seek(&self, _position_ms: u64) -> Result<(), PlayerError> {
            Err(PlayerError::PreconditionFailed(
                "no current track handle for seek".to_string(),
            ))
        }
    }

    fn hub_with_queue(queue_len: usize) -> (Arc<RelayHub>, Arc<StateCache>) {
        let cache = Arc::new(StateCache::new());
        let dispatcher =
            CommandDispatcher::new(Arc::new(UnavailableBackend), Arc::clone(&cache));
        let hub = Arc::new(RelayHub::new(Arc::clone(&cache), dispatcher, queue_len));
        (hub, cache)
    }

    fn track(id: &str) -> TrackMetadata {
        TrackMetadata {
            track_id: id.to_string(),
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: None,
            artwork_url: None,
            duration_ms: Some(180_000),
        }
    }

    #[tokio::test]
    async fn new_observer_gets_the_exact_cached_snapshot() {
        let (hub, cache) = hub_with_queue(16);
        cache.apply(&PlayerEvent::MetadataChanged(track("t1")));
        cache.apply(&PlayerEvent::StatusChanged(PlaybackStatus::Playing));

        let mut observer = hub.subscribe();
        let metadata = observer.recv().await.unwrap();
        let status = observer.recv().await.unwrap();
        let position = observer.recv().await.unwrap();

        assert_eq!(
            metadata,
            ServerMessage::Metadata(Some(track("t1")))
        );
        assert_eq!(status, ServerMessage::PlaybackState(PlaybackStatus::Playing));
        assert_eq!(position, ServerMessage::Position(0));
    }

    #[tokio::test]
    async fn saturated_observer_is_dropped_without_affecting_others() {
        let (hub, _cache) = hub_with_queue(4);
        let _stalled = hub.subscribe();
        let mut healthy = hub.subscribe();
        // Drain the healthy observer's snapshot frames.
        for _ in 0..3 {
            healthy.recv().await.unwrap();
        }
        assert_eq!(hub.observer_count(), 2);

        // The stalled observer never drains; its 4-slot queue already holds
        // the 3 snapshot frames, so the second publish overflows it.
        let mut received = Vec::new();
        for n in 0..6u64 {
            hub.publish(ServerMessage::Position(n * 1_000));
            received.push(healthy.recv().await.unwrap());
        }

        assert_eq!(hub.observer_count(), 1);
        let expected: Vec<ServerMessage> =
            (0..6u64).map(|n| ServerMessage::Position(n * 1_000)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn dropping_a_handle_unsubscribes_only_that_observer() {
        let (hub, _cache) = hub_with_queue(8);
        let first = hub.subscribe();
        let _second = hub.subscribe();
        assert_eq!(hub.observer_count(), 2);

        drop(first);
        assert_eq!(hub.observer_count(), 1);
    }

    #[tokio::test]
    async fn command_against_unavailable_adapter_mutates_nothing() {
        let (hub, cache) = hub_with_queue(8);
        let mut observer = hub.subscribe();
        for _ in 0..3 {
            observer.recv().await.unwrap();
        }
        let before = cache.snapshot();

        let result = hub.command(hudcast_core::PlayerCommand::Play).await;
        assert!(matches!(result, Err(PlayerError::AdapterUnavailable)));

        let after = cache.snapshot();
        assert_eq!(before.status, after.status);
        assert_eq!(before.position_ms, after.position_ms);
        // No fan-out was produced either.
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn seek_without_track_context_fails_and_mutates_nothing() {
        let cache = Arc::new(StateCache::new());
        let dispatcher = CommandDispatcher::new(Arc::new(NoTrackBackend), Arc::clone(&cache));
        let hub = Arc::new(RelayHub::new(Arc::clone(&cache), dispatcher, 8));
        let mut observer = hub.subscribe();
        for _ in 0..3 {
            observer.recv().await.unwrap();
        }
        let before = cache.snapshot();

        let result = hub
            .command(hudcast_core::PlayerCommand::Seek { position_ms: 5_000 })
            .await;
        assert!(matches!(result, Err(PlayerError::PreconditionFailed(_))));

        let after = cache.snapshot();
        assert_eq!(before.position_ms, after.position_ms);
        assert_eq!(before.status, after.status);
        assert!(observer.try_recv().is_err());
    }
}
