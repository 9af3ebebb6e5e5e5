use crate::audio::EngineError;
use crate::media::{ContentPreference, MediaType, PreferenceUpdate, Track};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reply channel for commands that complete asynchronously.
pub type Responder = oneshot::Sender<Result<(), EngineError>>;

/// Overall engine state. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Loading => "loading",
            EngineState::Playing => "playing",
            EngineState::Paused => "paused",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One progress sample of the active handle, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub buffered_ms: u64,
}

impl ProgressSnapshot {
    pub fn remaining_ms(&self) -> u64 {
        self.duration_ms.saturating_sub(self.position_ms)
    }
}

/// Synchronous view of the active handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub current_time_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
}

/// Everything the engine republishes for synchronous reads.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub current_track: Option<Track>,
    pub status: Option<PlaybackStatus>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        EngineSnapshot {
            state: EngineState::Idle,
            current_track: None,
            status: None,
        }
    }
}

/// Events broadcast to every subscriber of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TrackStart(Track),
    TrackEnd(Track),
    Error(EngineError),
    StateChange(EngineState),
    Progress(ProgressSnapshot),
}

/// Callback registered through `subscribe_progress`.
#[derive(Clone)]
pub struct ProgressListener(pub(crate) Arc<dyn Fn(ProgressSnapshot) + Send + Sync>);

impl ProgressListener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        ProgressListener(Arc::new(callback))
    }

    pub(crate) fn notify(&self, snapshot: ProgressSnapshot) {
        (self.0)(snapshot)
    }
}

impl fmt::Debug for ProgressListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressListener")
    }
}

/// Commands that can be sent to the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    LoadAndPlay {
        track: Track,
        preload_next: Option<Track>,
        respond_to: Responder,
    },
    Preload {
        track: Track,
        respond_to: Responder,
    },
    CrossfadeToNext {
        next: Track,
        respond_to: Responder,
    },
    Play,
    Pause,
    Stop,
    SeekTo {
        position_ms: i64,
    },
    SubscribeProgress {
        listener: ProgressListener,
        respond_to: oneshot::Sender<u64>,
    },
    UnsubscribeProgress {
        id: u64,
    },
    UpdatePreferences(PreferenceUpdate),
    GetPreferences(oneshot::Sender<HashMap<MediaType, ContentPreference>>),
    Shutdown,
}
