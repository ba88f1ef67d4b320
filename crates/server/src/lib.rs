//! Observer transport: a WebSocket endpoint speaking the named-event JSON
//! protocol. Each connection is one observer with its own fan-out task;
//! a failing or slow connection only ever tears down itself.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use hudcast_core::{ClientMessage, CommandError, PlayerCommand, ServerMessage};
use hudcast_engine::RelayHub;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<RelayHub>,
    friendly_name: String,
}

impl RelayServer {
    pub async fn bind(
        host: &str,
        port: u16,
        friendly_name: String,
        hub: Arc<RelayHub>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        Ok(Self {
            listener,
            hub,
            friendly_name,
        })
    }

    /// The stable address an external service advertiser can publish.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("failed accepting observer connection")?;
            let hub = Arc::clone(&self.hub);
            let friendly_name = self.friendly_name.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, peer, hub, friendly_name).await {
                    debug!(peer = %peer, error = %err, "observer connection ended");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<RelayHub>,
    friendly_name: String,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let (mut sink, mut source) = ws.split();

    let mut observer = hub.subscribe();
    let id = observer.id();
    info!(observer = id, peer = %peer, "observer connected");

    loop {
        tokio::select! {
            outbound = observer.recv() => {
                // None means the hub dropped this observer (overflow) and
                // the backlog is drained.
                let Some(frame) = outbound else { break };
                let text = serde_json::to_string(&frame)
                    .context("failed encoding outbound frame")?;
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &hub, id, &friendly_name);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(observer = id, error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    info!(observer = id, "observer closed");
    Ok(())
}

/// Shape validation only; command semantics live in the dispatcher.
fn handle_frame(text: &str, hub: &Arc<RelayHub>, id: u64, friendly_name: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(observer = id, error = %err, "unparseable observer frame");
            hub.send_to(
                id,
                ServerMessage::Error(CommandError {
                    command: "parse".to_string(),
                    message: err.to_string(),
                }),
            );
            return;
        }
    };

    match message {
        ClientMessage::Play => submit(hub, id, PlayerCommand::Play),
        ClientMessage::Pause => submit(hub, id, PlayerCommand::Pause),
        ClientMessage::Next => submit(hub, id, PlayerCommand::Next),
        ClientMessage::Previous => submit(hub, id, PlayerCommand::Previous),
        ClientMessage::Seek(position_ms) => submit(hub, id, PlayerCommand::Seek { position_ms }),
        ClientMessage::GetMetadata => {
            let snapshot = hub.snapshot();
            hub.send_to(id, ServerMessage::Metadata(snapshot.metadata));
        }
        ClientMessage::GetPosition => {
            hub.send_to(id, ServerMessage::Position(hub.snapshot().position_ms));
        }
        ClientMessage::GetPlaybackState => {
            hub.send_to(id, ServerMessage::PlaybackState(hub.snapshot().status));
        }
        ClientMessage::FriendlyName => {
            hub.send_to(id, ServerMessage::FriendlyName(friendly_name.to_string()));
        }
    }
}

/// Runs the command off the connection task so a blocking backend call
/// never stalls this observer's outbound drain. Failures are reported to
/// the issuing observer only.
fn submit(hub: &Arc<RelayHub>, id: u64, command: PlayerCommand) {
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        if let Err(err) = hub.command(command).await {
            warn!(observer = id, command = command.name(), error = %err, "command failed");
            hub.send_to(
                id,
                ServerMessage::Error(CommandError {
                    command: command.name().to_string(),
                    message: err.to_string(),
                }),
            );
        }
    });
}
