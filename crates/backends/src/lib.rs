//! Backend adapters: one capability contract over two sources of playback
//! truth, a real player reached over MPRIS and a simulated player.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hudcast_core::{AppConfig, PlayerError, PlayerEvent, PlayerSnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Capability contract shared by every backend variant.
///
/// Discrete commands fail independently; a failed command never aborts the
/// event stream returned by [`subscribe`](PlayerBackend::subscribe).
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a lazy, unbounded stream of normalized player events.
    fn subscribe(&self) -> UnboundedReceiver<PlayerEvent>;

    /// Reads the full current state from the source of truth.
    async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerError>;

    /// Reads the current playback position in milliseconds. Used by the
    /// sampling timer for backends that do not push position promptly.
    async fn position(&self) -> Result<u64, PlayerError>;

    async fn play(&self) -> Result<(), PlayerError>;
    async fn pause(&self) -> Result<(), PlayerError>;
    async fn next(&self) -> Result<(), PlayerError>;
    async fn previous(&self) -> Result<(), PlayerError>;
    async fn seek(&self, position_ms: u64) -> Result<(), PlayerError>;
}

/// Fan-out point for backend events. Dead subscribers are pruned on emit.
#[derive(Default)]
pub(crate) struct EventListeners {
    senders: Mutex<Vec<UnboundedSender<PlayerEvent>>>,
}

impl EventListeners {
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<PlayerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        self.senders
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Selects the backend variant at construction; nothing downstream inspects
/// the concrete type again.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn PlayerBackend>> {
    match cfg.backend.as_str() {
        "simulated" => Ok(Arc::new(simulated::SimulatedBackend::new(
            cfg.intervals.sim_tick_ms,
        ))),
        "mpris" => platform::mpris_backend(cfg)
            .context("the mpris backend is only available on Linux"),
        other => bail!("unknown backend '{other}' (expected 'mpris' or 'simulated')"),
    }
}

/// Reads a snapshot, retrying while the backend reports
/// [`PlayerError::AdapterUnavailable`], until the deadline passes. Backends
/// connect in the background; one-shot callers use this to wait out the
/// initial connect.
pub async fn snapshot_with_retry(
    backend: &dyn PlayerBackend,
    deadline: Duration,
) -> Result<PlayerSnapshot, PlayerError> {
    let retry = Duration::from_millis(250);
    let started = tokio::time::Instant::now();
    loop {
        match backend.snapshot().await {
            Err(PlayerError::AdapterUnavailable) if started.elapsed() + retry <= deadline => {
                tokio::time::sleep(retry).await;
            }
            other => return other,
        }
    }
}

/// Lists MPRIS-capable bus names for the `doctor` command.
#[cfg(target_os = "linux")]
pub async fn list_mpris_services() -> Result<Vec<String>> {
    use zbus::{Connection, Proxy};

    let conn = Connection::session()
        .await
        .context("failed to connect DBus session")?;
    let proxy = Proxy::new(
        &conn,
        "org.freedesktop.DBus",
        "/org/freedesktop/DBus",
        "org.freedesktop.DBus",
    )
    .await?;

    let names: Vec<String> = proxy.call("ListNames", &()).await?;
    let mut players: Vec<String> = names
        .into_iter()
        .filter(|n| n.starts_with("org.mpris.MediaPlayer2."))
        .collect();
    players.sort();
    Ok(players)
}

#[cfg(not(target_os = "linux"))]
pub async fn list_mpris_services() -> Result<Vec<String>> {
    Ok(Vec::new())
}

mod platform {
    use super::PlayerBackend;
    use hudcast_core::AppConfig;
    use std::sync::Arc;

    #[cfg(target_os = "linux")]
    pub fn mpris_backend(cfg: &AppConfig) -> Option<Arc<dyn PlayerBackend>> {
        Some(Arc::new(crate::mpris::MprisBackend::new(cfg.mpris.clone())))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn mpris_backend(_cfg: &AppConfig) -> Option<Arc<dyn PlayerBackend>> {
        None
    }
}

#[cfg(target_os = "linux")]
mod mpris;
pub mod simulated;

#[cfg(target_os = "linux")]
pub use mpris::MprisBackend;
pub use simulated::SimulatedBackend;
