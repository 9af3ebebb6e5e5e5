//! Playback handle trait and the factory that opens handles.

use crate::audio::error::EngineError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const LOG_TARGET: &str = "r_crossfader::audio::handle";

/// Thin wrapper around one platform audio primitive.
///
/// Implementations are owned exclusively by the engine; nothing else holds a
/// reference to a live handle. All calls are fire-and-forget against the
/// native player and must not block.
pub trait PlaybackHandle: Send {
    /// Starts or resumes audible output at the current volume.
    fn play(&mut self);

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    /// Sets the output gain, clamped to `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    fn position_ms(&self) -> u64;

    /// Total duration, once the native player knows it.
    fn duration_ms(&self) -> Option<u64>;

    /// How far the source is buffered. Backends without a real buffered
    /// range report `None` and callers treat the full duration as buffered.
    fn buffered_ms(&self) -> Option<u64> {
        None
    }

    fn seek_ms(&mut self, position_ms: u64);

    /// Frees the native resource. The engine always pauses first.
    fn release(&mut self);
}

/// Everything a factory needs to build one handle.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub uri: String,
    pub volume: f32,
    /// Start audible output as soon as the handle is ready.
    pub autoplay: bool,
    /// Channel through which the handle reports mid-playback failures.
    pub faults: FaultReporter,
}

/// Builds playback handles for URIs. One implementation per platform.
#[async_trait]
pub trait HandleFactory: Send + Sync {
    async fn open(&self, request: OpenRequest) -> Result<Box<dyn PlaybackHandle>, EngineError>;
}

/// A failure raised by a live handle after it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleFault {
    pub track_id: String,
    /// Identifies the load request that produced the failing handle.
    pub request_id: u64,
    pub reason: String,
}

/// Remembers which track and load request a handle belongs to, so that a
/// late fault can be recognised as stale by the engine.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<HandleFault>,
    track_id: String,
    request_id: u64,
}

impl FaultReporter {
    pub fn new(tx: mpsc::UnboundedSender<HandleFault>, track_id: impl Into<String>, request_id: u64) -> Self {
        Self {
            tx,
            track_id: track_id.into(),
            request_id,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Forwards a fault to the engine. Dropped silently once the engine is gone.
    pub fn report(&self, reason: impl Into<String>) {
        let fault = HandleFault {
            track_id: self.track_id.clone(),
            request_id: self.request_id,
            reason: reason.into(),
        };
        warn!(target: LOG_TARGET, track_id = %fault.track_id, request_id = fault.request_id, "Handle reported fault: {}", fault.reason);
        if self.tx.send(fault).is_err() {
            debug!(target: LOG_TARGET, track_id = %self.track_id, "Fault receiver dropped, engine no longer running.");
        }
    }
}

/// Pause-then-release, the only disposal order the engine uses.
pub fn dispose(handle: &mut dyn PlaybackHandle) {
    handle.pause();
    handle.release();
}
