//! Remote backend reached over the MPRIS D-Bus control protocol.
//!
//! MPRIS reports time in microseconds; every value is converted to
//! milliseconds at this boundary. Property change notifications are watched
//! for `Metadata`, `PlaybackStatus` and `Position`; players that do not push
//! `Position` are covered by the reconciler's sampling timer calling
//! [`PlayerBackend::position`].

use crate::{EventListeners, PlayerBackend};
use async_trait::async_trait;
use futures_util::StreamExt;
use hudcast_core::{
    MprisConfig, PlaybackStatus, PlayerError, PlayerEvent, PlayerSnapshot, PositionSource,
    TrackMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Str};
use zbus::{Connection, Proxy};

const PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";
const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

pub struct MprisBackend {
    inner: Arc<MprisInner>,
}

struct MprisInner {
    cfg: MprisConfig,
    /// Present only while the control channel is connected; every command
    /// fails `AdapterUnavailable` while this is `None`.
    proxy: RwLock<Option<Proxy<'static>>>,
    listeners: EventListeners,
}

impl MprisBackend {
    /// Constructs without awaiting the bus: a supervisor task connects in
    /// the background and reconnects with backoff whenever the notification
    /// stream drops.
    pub fn new(cfg: MprisConfig) -> Self {
        let inner = Arc::new(MprisInner {
            cfg,
            proxy: RwLock::new(None),
            listeners: EventListeners::default(),
        });

        let supervisor = Arc::clone(&inner);
        tokio::spawn(async move { supervisor.supervise().await });

        Self { inner }
    }
}

impl MprisInner {
    async fn supervise(self: Arc<Self>) {
        let mut backoff_idx = 0usize;
        loop {
            match self.connect().await {
                Ok(proxy) => {
                    info!(service = %self.cfg.service_name, "mpris control channel connected");
                    backoff_idx = 0;
                    *self.proxy.write().await = Some(proxy.clone());
                    self.emit_current(&proxy).await;
                    self.monitor(&proxy).await;
                    *self.proxy.write().await = None;
                    warn!(
                        service = %self.cfg.service_name,
                        "mpris notification stream ended; reconnecting"
                    );
                }
                Err(err) => {
                    debug!(service = %self.cfg.service_name, error = %err, "mpris connect failed");
                }
            }

            let delay = BACKOFF_STEPS[backoff_idx.min(BACKOFF_STEPS.len() - 1)];
            backoff_idx = (backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(&self) -> zbus::Result<Proxy<'static>> {
        let conn = Connection::session().await?;
        Proxy::new_owned(
            conn,
            self.cfg.service_name.clone(),
            self.cfg.object_path.clone(),
            PLAYER_IFACE.to_string(),
        )
        .await
    }

    /// Emits the full property set so the cache is primed after every
    /// (re)connect.
    async fn emit_current(&self, proxy: &Proxy<'static>) {
        if let Ok(status) = proxy.get_property::<String>("PlaybackStatus").await {
            self.listeners
                .emit(PlayerEvent::StatusChanged(parse_status(&status)));
        }
        if let Ok(map) = proxy
            .get_property::<HashMap<String, OwnedValue>>("Metadata")
            .await
        {
            if let Some(metadata) = track_from_metadata(&map) {
                self.listeners.emit(PlayerEvent::MetadataChanged(metadata));
            }
        }
        if let Ok(position) = proxy.get_property::<i64>("Position").await {
            self.listeners.emit(PlayerEvent::PositionObserved {
                position_ms: micros_to_ms(position),
                source: PositionSource::Pushed,
            });
        }
    }

    /// Runs until the property notification streams end or the configured
    /// service leaves the bus.
    async fn monitor(&self, proxy: &Proxy<'static>) {
        let mut status_changes = proxy
            .receive_property_changed::<String>("PlaybackStatus")
            .await;
        let mut metadata_changes = proxy
            .receive_property_changed::<HashMap<String, OwnedValue>>("Metadata")
            .await;
        let mut position_changes = proxy.receive_property_changed::<i64>("Position").await;

        // Property streams stay silent when the player quits; the bus
        // daemon's NameOwnerChanged is what reports the loss.
        let dbus = zbus::fdo::DBusProxy::new(proxy.connection()).await.ok();
        let mut owner_changes = match &dbus {
            Some(dbus) => dbus.receive_name_owner_changed().await.ok(),
            None => None,
        };

        loop {
            tokio::select! {
                maybe = status_changes.next() => {
                    let Some(change) = maybe else { break };
                    match change.get().await {
                        Ok(status) => self
                            .listeners
                            .emit(PlayerEvent::StatusChanged(parse_status(&status))),
                        Err(err) => debug!(error = %err, "failed reading PlaybackStatus change"),
                    }
                }
                maybe = metadata_changes.next() => {
                    let Some(change) = maybe else { break };
                    match change.get().await {
                        Ok(map) => {
                            if let Some(metadata) = track_from_metadata(&map) {
                                self.listeners.emit(PlayerEvent::MetadataChanged(metadata));
                            }
                        }
                        Err(err) => debug!(error = %err, "failed reading Metadata change"),
                    }
                }
                maybe = position_changes.next() => {
                    let Some(change) = maybe else { break };
                    match change.get().await {
                        Ok(position) => self.listeners.emit(PlayerEvent::PositionObserved {
                            position_ms: micros_to_ms(position),
                            source: PositionSource::Pushed,
                        }),
                        Err(err) => debug!(error = %err, "failed reading Position change"),
                    }
                }
                maybe = next_or_pending(&mut owner_changes) => {
                    let Some(signal) = maybe else { break };
                    if let Ok(args) = signal.args() {
                        if service_vanished(
                            args.name().as_str(),
                            args.new_owner().is_some(),
                            &self.cfg.service_name,
                        ) {
                            info!(service = %self.cfg.service_name, "player left the bus");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn control(&self) -> Result<Proxy<'static>, PlayerError> {
        self.proxy
            .read()
            .await
            .clone()
            .ok_or(PlayerError::AdapterUnavailable)
    }

    async fn call(&self, method: &'static str) -> Result<(), PlayerError> {
        let proxy = self.control().await?;
        proxy
            .call_method(method, &())
            .await
            .map(|_| ())
            .map_err(|err| PlayerError::BackendRejected(err.to_string()))
    }
}

#[async_trait]
impl PlayerBackend for MprisBackend {
    fn name(&self) -> &'static str {
        "mpris"
    }

    fn subscribe(&self) -> UnboundedReceiver<PlayerEvent> {
        self.inner.listeners.subscribe()
    }

    async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerError> {
        let proxy = self.inner.control().await?;
        let status = proxy
            .get_property::<String>("PlaybackStatus")
            .await
            .map(|s| parse_status(&s))
            .unwrap_or(PlaybackStatus::Stopped);
        let metadata = proxy
            .get_property::<HashMap<String, OwnedValue>>("Metadata")
            .await
            .ok()
            .and_then(|map| track_from_metadata(&map));
        let position_ms = proxy
            .get_property::<i64>("Position")
            .await
            .map(micros_to_ms)
            .unwrap_or(0);
        Ok(PlayerSnapshot {
            metadata,
            status,
            position_ms,
            updated_at: SystemTime::now(),
        })
    }

    async fn position(&self) -> Result<u64, PlayerError> {
        let proxy = self.inner.control().await?;
        let position: i64 = proxy
            .get_property("Position")
            .await
            .map_err(|err| PlayerError::BackendRejected(err.to_string()))?;
        Ok(micros_to_ms(position))
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.inner.call("Play").await
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.inner.call("Pause").await
    }

    async fn next(&self) -> Result<(), PlayerError> {
        self.inner.call("Next").await
    }

    async fn previous(&self) -> Result<(), PlayerError> {
        self.inner.call("Previous").await
    }

    /// MPRIS `SetPosition` needs the current track's object handle; without
    /// one the seek fails before touching the bus.
    async fn seek(&self, position_ms: u64) -> Result<(), PlayerError> {
        let proxy = self.inner.control().await?;
        let metadata: HashMap<String, OwnedValue> = proxy
            .get_property("Metadata")
            .await
            .map_err(|err| PlayerError::BackendRejected(err.to_string()))?;
        let track = metadata
            .get("mpris:trackid")
            .and_then(track_handle)
            .ok_or_else(|| {
                PlayerError::PreconditionFailed("no current track handle for seek".to_string())
            })?;

        let position_us = (position_ms as i64).saturating_mul(1_000);
        proxy
            .call_method("SetPosition", &(track, position_us))
            .await
            .map(|_| ())
            .map_err(|err| PlayerError::BackendRejected(err.to_string()))
    }
}

/// Polls the stream when one exists; never resolves otherwise, so a missing
/// owner-change stream leaves the other select arms in charge.
async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: futures_util::Stream + Unpin,
{
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

/// True when the configured service lost its bus name without a successor.
fn service_vanished(name: &str, new_owner_present: bool, configured: &str) -> bool {
    !new_owner_present && name == configured
}

fn micros_to_ms(position_us: i64) -> u64 {
    (position_us.max(0) as u64) / 1_000
}

fn parse_status(status: &str) -> PlaybackStatus {
    match status {
        "Playing" => PlaybackStatus::Playing,
        "Paused" => PlaybackStatus::Paused,
        _ => PlaybackStatus::Stopped,
    }
}

fn ov_to_string(v: &OwnedValue) -> Option<String> {
    let owned = v.try_clone().ok()?;
    if let Ok(s) = String::try_from(owned.try_clone().ok()?) {
        return Some(s);
    }
    if let Ok(s) = Str::try_from(owned) {
        return Some(s.to_string());
    }
    None
}

fn ov_to_i64(v: &OwnedValue) -> Option<i64> {
    if let Ok(i) = <i64>::try_from(v) {
        return Some(i);
    }
    if let Ok(u) = <u64>::try_from(v) {
        return Some(u as i64);
    }
    None
}

fn artist_from_value(v: &OwnedValue) -> Option<String> {
    if let Ok(arr) = Vec::<String>::try_from(v.try_clone().ok()?) {
        return arr.into_iter().next();
    }
    None
}

fn track_handle(v: &OwnedValue) -> Option<OwnedObjectPath> {
    let owned = v.try_clone().ok()?;
    OwnedObjectPath::try_from(owned).ok()
}

fn track_from_metadata(map: &HashMap<String, OwnedValue>) -> Option<TrackMetadata> {
    if map.is_empty() {
        return None;
    }

    let title = map
        .get("xesam:title")
        .and_then(ov_to_string)
        .unwrap_or_else(|| "Unknown Title".to_string());
    let artist = map
        .get("xesam:artist")
        .and_then(artist_from_value)
        .unwrap_or_else(|| "Unknown Artist".to_string());
    let track_id = map
        .get("mpris:trackid")
        .and_then(track_handle)
        .map(|p| p.to_string())
        .unwrap_or_else(|| format!("{artist}:{title}"));

    Some(TrackMetadata {
        track_id,
        title,
        artist,
        album: map.get("xesam:album").and_then(ov_to_string),
        artwork_url: map.get("mpris:artUrl").and_then(ov_to_string),
        duration_ms: map.get("mpris:length").and_then(ov_to_i64).map(micros_to_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::{micros_to_ms, parse_status, service_vanished};
    use hudcast_core::PlaybackStatus;

    #[test]
    fn positions_convert_microseconds_to_milliseconds() {
        assert_eq!(micros_to_ms(30_000_000), 30_000);
        assert_eq!(micros_to_ms(999), 0);
        assert_eq!(micros_to_ms(-5), 0);
    }

    #[test]
    fn unknown_status_maps_to_stopped() {
        assert_eq!(parse_status("Playing"), PlaybackStatus::Playing);
        assert_eq!(parse_status("Paused"), PlaybackStatus::Paused);
        assert_eq!(parse_status("Buffering"), PlaybackStatus::Stopped);
    }

    #[test]
    fn owner_loss_is_detected_only_for_the_configured_service() {
        let configured = "org.mpris.MediaPlayer2.spotify";
        assert!(service_vanished(configured, false, configured));
        // A handover to a new owner is not a loss.
        assert!(!service_vanished(configured, true, configured));
        // Another player leaving is not our loss.
        assert!(!service_vanished("org.mpris.MediaPlayer2.vlc", false, configured));
    }
}
