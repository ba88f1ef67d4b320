use thiserror::Error;

/// Failure taxonomy for the relay core.
///
/// None of these are fatal to the process: adapter loss degrades to a stale
/// snapshot with rejected commands, and observer overflow disconnects only
/// the saturated observer.
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// The backend control channel is not connected. Commands fail, the
    /// relay keeps serving the last-known snapshot.
    #[error("backend control channel not connected")]
    AdapterUnavailable,

    /// A command needs track context that is absent, e.g. a seek with no
    /// current track handle.
    #[error("command precondition failed: {0}")]
    PreconditionFailed(String),

    /// The backend reported a protocol-level error for a control call.
    #[error("backend rejected command: {0}")]
    BackendRejected(String),

    /// An observer's bounded outbound queue saturated; the observer is
    /// disconnected, never the stream.
    #[error("observer outbound queue overflowed")]
    ObserverOverflow,
}
