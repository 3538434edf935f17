//! Domain error type and the error taxonomy shared by every crate.

/// Coarse classification used to decide between retrying, surfacing a
/// warning, surfacing an error, or routing to the offline experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a usable answer (network, 5xx).
    Transport,
    /// The task or layout does not exist (yet).
    NotFound,
    /// Malformed input; surfaced to the user, never retried.
    Validation,
    /// The shared resource is busy; surfaced as a warning.
    Conflict,
    /// The push connection dropped.
    PushStreamFatal,
    /// Anything else.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Push stream closed: {0}")]
    StreamClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Map this error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Transport(_) => ErrorKind::Transport,
            CoreError::StreamClosed(_) => ErrorKind::PushStreamFatal,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}
