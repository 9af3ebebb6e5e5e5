//! Spawned handle opens with a single fallback retry.

use crate::audio::{dispose, EngineError, FaultReporter, HandleFactory, HandleFault, OpenRequest, PlaybackHandle};
use crate::engine::slots::SlotId;
use crate::engine::ENGINE_LOG_TARGET;
use crate::media::{ResolvedSource, Track};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// A handle that opened, possibly from the fallback URI.
pub(crate) struct OpenedHandle {
    pub handle: Box<dyn PlaybackHandle>,
    pub uri: String,
    /// Set when the primary source failed and the fallback was used.
    pub fallback_notice: Option<EngineError>,
}

/// Completion message sent back to the run loop.
pub(crate) struct OpenCompleted {
    pub slot: SlotId,
    pub request_id: u64,
    pub result: Result<OpenedHandle, EngineError>,
}

/// Parameters for one open attempt.
pub(crate) struct OpenJob {
    pub slot: SlotId,
    pub request_id: u64,
    pub track: Track,
    pub source: ResolvedSource,
    pub volume: f32,
    pub autoplay: bool,
}

/// Opens a handle off the run loop. The primary URI is tried first; on
/// failure exactly one retry is made against the type's fallback URI.
/// Aborting the returned task before it reports abandons the open.
pub(crate) fn spawn_open(
    factory: Arc<dyn HandleFactory>,
    job: OpenJob,
    fault_tx: mpsc::UnboundedSender<HandleFault>,
    completed_tx: mpsc::UnboundedSender<OpenCompleted>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slot = job.slot;
        let request_id = job.request_id;
        let result = open_with_fallback(factory.as_ref(), &job, fault_tx).await;
        if let Err(mpsc::error::SendError(mut completed)) = completed_tx.send(OpenCompleted { slot, request_id, result }) {
            debug!(target: ENGINE_LOG_TARGET, request_id, "Engine gone before open completed, releasing handle.");
            if let Ok(opened) = completed.result.as_mut() {
                dispose(opened.handle.as_mut());
            }
        }
    })
}

#[instrument(skip(factory, job, fault_tx), fields(track_id = %job.track.id, slot = %job.slot, request_id = job.request_id))]
async fn open_with_fallback(
    factory: &dyn HandleFactory,
    job: &OpenJob,
    fault_tx: mpsc::UnboundedSender<HandleFault>,
) -> Result<OpenedHandle, EngineError> {
    let faults = FaultReporter::new(fault_tx, job.track.id.clone(), job.request_id);
    let request = |uri: &str| OpenRequest {
        uri: uri.to_string(),
        volume: job.volume,
        autoplay: job.autoplay,
        faults: faults.clone(),
    };

    let primary_error = match factory.open(request(&job.source.primary)).await {
        Ok(handle) => {
            info!(target: ENGINE_LOG_TARGET, uri = %job.source.primary, "Opened handle from primary source.");
            return Ok(OpenedHandle {
                handle,
                uri: job.source.primary.clone(),
                fallback_notice: None,
            });
        }
        Err(e) => e,
    };

    if !job.source.has_distinct_fallback() {
        error!(target: ENGINE_LOG_TARGET, uri = %job.source.primary, "Fallback source failed to open: {}", primary_error);
        return Err(EngineError::LoadFailed {
            track_id: job.track.id.clone(),
            primary_uri: job.source.primary.clone(),
            fallback_uri: job.source.fallback.clone(),
            reason: primary_error.to_string(),
        });
    }

    warn!(target: ENGINE_LOG_TARGET, uri = %job.source.primary, fallback = %job.source.fallback, "Primary source failed ({}), retrying with fallback.", primary_error);
    match factory.open(request(&job.source.fallback)).await {
        Ok(handle) => Ok(OpenedHandle {
            handle,
            uri: job.source.fallback.clone(),
            fallback_notice: Some(EngineError::PrimarySourceFailed {
                track_id: job.track.id.clone(),
                uri: job.source.primary.clone(),
                fallback_uri: job.source.fallback.clone(),
                reason: primary_error.to_string(),
            }),
        }),
        Err(fallback_error) => {
            error!(target: ENGINE_LOG_TARGET, fallback = %job.source.fallback, "Fallback source failed too: {}", fallback_error);
            Err(EngineError::LoadFailed {
                track_id: job.track.id.clone(),
                primary_uri: job.source.primary.clone(),
                fallback_uri: job.source.fallback.clone(),
                reason: fallback_error.to_string(),
            })
        }
    }
}
