//! The synchronization and relay engine: a single writer task reconciles
//! backend events into the state cache, and the hub fans every change out
//! to independently connected observers.

mod cache;
mod dispatcher;
mod hub;
mod reconciler;

pub use cache::StateCache;
pub use dispatcher::CommandDispatcher;
pub use hub::{ObserverHandle, RelayHub};
pub use reconciler::PositionReconciler;

use hudcast_backends::PlayerBackend;
use hudcast_core::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Wires cache, dispatcher, hub and reconciler around one backend and
/// spawns the writer task. There is exactly one cache per process; it is
/// created here and injected everywhere it is read.
pub fn start(backend: Arc<dyn PlayerBackend>, cfg: &AppConfig) -> (Arc<RelayHub>, JoinHandle<()>) {
    let cache = Arc::new(StateCache::new());
    let dispatcher = CommandDispatcher::new(Arc::clone(&backend), Arc::clone(&cache));
    let hub = Arc::new(RelayHub::new(
        Arc::clone(&cache),
        dispatcher,
        cfg.observer_queue_len,
    ));

    let events = backend.subscribe();
    let reconciler = PositionReconciler::new(
        backend,
        cache,
        Arc::clone(&hub),
        Duration::from_millis(cfg.intervals.position_poll_ms.max(100)),
    );
    let writer = tokio::spawn(reconciler.run(events));

    (hub, writer)
}
