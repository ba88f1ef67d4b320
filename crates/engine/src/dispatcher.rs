use crate::StateCache;
use hudcast_backends::PlayerBackend;
use hudcast_core::{PlayerCommand, PlayerError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Serializes control calls against one adapter: a new command waits for
/// the in-flight one to finish (success or failure) before it is issued.
/// Distinct adapters would each get their own dispatcher.
pub struct CommandDispatcher {
    backend: Arc<dyn PlayerBackend>,
    cache: Arc<StateCache>,
    serial: Mutex<()>,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn PlayerBackend>, cache: Arc<StateCache>) -> Self {
        Self {
            backend,
            cache,
            serial: Mutex::new(()),
        }
    }

    pub async fn dispatch(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        let _in_flight = self.serial.lock().await;
        debug!(command = command.name(), "dispatching player command");
        match command {
            PlayerCommand::Play => self.backend.play().await,
            PlayerCommand::Pause => self.backend.pause().await,
            PlayerCommand::Next => self.backend.next().await,
            PlayerCommand::Previous => self.backend.previous().await,
            PlayerCommand::Seek { position_ms } => {
                // Seeks past the end of the track are clamped to the known
                // duration rather than rejected.
                let clamped = match self.cache.duration_ms() {
                    Some(duration) => position_ms.min(duration),
                    None => position_ms,
                };
                self.backend.seek(clamped).await
            }
        }
    }
}
