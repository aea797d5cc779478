use thiserror::Error;

/// Typed faults of the sync core. Duplicate pushes are not errors (they are
/// silently dropped); consistency faults are logged and absorbed. Everything
/// a caller can act on surfaces through this enum.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network/timeout failure talking to a collaborator. Retryable; the
    /// local cache is left untouched.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// No realtime channel is attached (never connected, or disconnected).
    #[error("realtime channel not connected")]
    NotConnected,

    /// Operation referenced a conversation id the store has never seen.
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}
