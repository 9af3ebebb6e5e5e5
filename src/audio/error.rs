use std::error::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors reported by the playback engine, either as a command result or
/// through `EngineEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A handle could not be constructed for a URI.
    HandleOpen { uri: String, reason: String },
    /// The primary source failed and the fallback was used instead.
    /// Playback continues; this is a diagnostic.
    PrimarySourceFailed {
        track_id: String,
        uri: String,
        fallback_uri: String,
        reason: String,
    },
    /// Both the primary source and the fallback failed.
    LoadFailed {
        track_id: String,
        primary_uri: String,
        fallback_uri: String,
        reason: String,
    },
    /// A live handle reported a failure mid-playback.
    Playback { track_id: String, reason: String },
    TransitionInProgress,
    /// The request was overtaken by a newer command before it finished.
    Superseded { track_id: String },
    EngineClosed,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::HandleOpen { uri, reason } => write!(f, "Cannot open '{}': {}", uri, reason),
            EngineError::PrimarySourceFailed { track_id, uri, fallback_uri, reason } => write!(
                f,
                "Primary source '{}' for track {} failed ({}), playing fallback '{}'",
                uri, track_id, reason, fallback_uri
            ),
            EngineError::LoadFailed { track_id, primary_uri, fallback_uri, reason } => write!(
                f,
                "Failed to load track {} from '{}' or fallback '{}': {}",
                track_id, primary_uri, fallback_uri, reason
            ),
            EngineError::Playback { track_id, reason } => write!(f, "Playback error on track {}: {}", track_id, reason),
            EngineError::TransitionInProgress => write!(f, "A transition is already in progress"),
            EngineError::Superseded { track_id } => write!(f, "Request for track {} was superseded", track_id),
            EngineError::EngineClosed => write!(f, "Engine task is no longer running"),
        }
    }
}

impl Error for EngineError {}

// --- From Implementations for EngineError ---

impl<T> From<mpsc::error::SendError<T>> for EngineError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        EngineError::EngineClosed
    }
}

impl From<oneshot::error::RecvError> for EngineError {
    fn from(_: oneshot::error::RecvError) -> Self {
        EngineError::EngineClosed
    }
}
