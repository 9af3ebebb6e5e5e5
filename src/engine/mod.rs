//! Dual-slot playback engine.
//!
//! The engine owns two playback slots and runs as a single tokio task. All
//! slot mutation happens inside that task's run loop; callers interact with
//! it through a cloneable [`EngineHandle`].

use crate::audio::{EngineError, HandleFactory, HandleFault};
use crate::config::EngineSettings;
use crate::media::{ContentPreference, FallbackResolver, MediaType, PreferenceStore, PreferenceUpdate, Track};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

mod command_handler;
pub mod fade;
mod loader;
pub mod progress;
mod run_loop;
pub mod slots;
mod state;

pub use fade::{FadeEnvelope, FadeStep};
pub use slots::SlotId;
pub use state::{
    EngineCommand, EngineEvent, EngineSnapshot, EngineState, PlaybackStatus, ProgressListener, ProgressSnapshot,
};

use fade::Transition;
use loader::OpenCompleted;
use progress::{ProgressRegistry, Ticker};
use slots::SlotPair;

const ENGINE_LOG_TARGET: &str = "r_crossfader::engine";

/// The playback engine. Construct with [`Engine::new`] and drive with
/// [`Engine::run`], or use [`Engine::spawn`] for both.
pub struct Engine {
    // --- Configuration ---
    settings: EngineSettings,
    factory: Arc<dyn HandleFactory>,
    resolver: FallbackResolver,
    preferences: PreferenceStore,

    // --- State ---
    slots: SlotPair,
    state: EngineState,
    transition: Transition,
    /// Track preloaded for the auto-trigger
    next_track: Option<Track>,
    /// Preference captured at the last load or transition start
    effective_pref: ContentPreference,
    recovery_attempts: u32,
    next_request_id: u64,

    // --- Timers ---
    progress_ticker: Ticker,
    fade_ticker: Ticker,
    listeners: ProgressRegistry,

    // --- Communication ---
    command_rx: mpsc::Receiver<EngineCommand>,
    completed_tx: mpsc::UnboundedSender<OpenCompleted>,
    completed_rx: mpsc::UnboundedReceiver<OpenCompleted>,
    fault_tx: mpsc::UnboundedSender<HandleFault>,
    fault_rx: mpsc::UnboundedReceiver<HandleFault>,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl Engine {
    /// Creates an engine and the handle used to control it.
    /// The engine does nothing until [`run`](Engine::run) is awaited.
    pub fn new(settings: EngineSettings, factory: Arc<dyn HandleFactory>) -> (Self, EngineHandle) {
        if let Err(e) = settings.validate() {
            warn!(target: ENGINE_LOG_TARGET, error = %e, "Engine settings failed validation, zero durations and capacities are clamped.");
        }
        let (command_tx, command_rx) = mpsc::channel(settings.command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(settings.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            resolver: FallbackResolver::new(settings.fallback_uris.clone()),
            preferences: PreferenceStore::with_overrides(&settings.preferences),
            settings,
            factory,
            slots: SlotPair::new(),
            state: EngineState::Idle,
            transition: Transition::Idle,
            next_track: None,
            effective_pref: ContentPreference::defaults_for(MediaType::Song),
            recovery_attempts: 0,
            next_request_id: 0,
            progress_ticker: Ticker::default(),
            fade_ticker: Ticker::default(),
            listeners: ProgressRegistry::default(),
            command_rx,
            completed_tx,
            completed_rx,
            fault_tx,
            fault_rx,
            event_tx: event_tx.clone(),
            snapshot_tx,
        };

        let handle = EngineHandle {
            command_tx,
            event_tx,
            snapshot_rx,
        };
        (engine, handle)
    }

    /// Creates an engine and spawns its run loop on the current runtime.
    pub fn spawn(settings: EngineSettings, factory: Arc<dyn HandleFactory>) -> (EngineHandle, JoinHandle<()>) {
        let (engine, handle) = Engine::new(settings, factory);
        let task = tokio::spawn(engine.run());
        (handle, task)
    }

    /// Runs the command loop until shutdown or until every handle is dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        run_loop::run_engine_loop(&mut self).await;
    }

    // --- Private Helper Methods ---

    /// Sends an event to subscribers, ignoring the no-listener case.
    fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            // No receivers is normal when nobody subscribed yet.
            debug!(target: ENGINE_LOG_TARGET, "No active listeners for engine event.");
        }
    }

    /// Moves to `state`, emitting a change event only if it differs.
    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        info!(target: ENGINE_LOG_TARGET, from = %self.state, to = %state, "Engine state change.");
        self.state = state;
        self.emit(EngineEvent::StateChange(state));
        self.publish_snapshot();
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    fn status(&self) -> Option<PlaybackStatus> {
        let slot = self.slots.active();
        let handle = slot.handle()?;
        let hint = slot.track().and_then(|t| t.duration_hint_ms);
        let snapshot = progress::sample(handle, hint);
        Some(PlaybackStatus {
            current_time_ms: snapshot.position_ms,
            duration_ms: snapshot.duration_ms,
            is_playing: handle.is_playing(),
        })
    }

    /// Republishes the synchronous view read by [`EngineHandle`].
    fn publish_snapshot(&self) {
        let snapshot = EngineSnapshot {
            state: self.state,
            current_track: self.slots.active().track().cloned(),
            status: self.status(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// Cloneable control surface for a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx.send(command).await?;
        Ok(())
    }

    async fn request(&self, command: EngineCommand, rx: oneshot::Receiver<Result<(), EngineError>>) -> Result<(), EngineError> {
        self.send(command).await?;
        rx.await?
    }

    /// Replaces the active item and starts it at full volume. Resolves once
    /// the handle is playing, or with the load error. `preload_next` is
    /// primed into the standby slot without waiting for it.
    pub async fn load_and_play(&self, track: Track, preload_next: Option<Track>) -> Result<(), EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.request(EngineCommand::LoadAndPlay { track, preload_next, respond_to }, rx).await
    }

    /// Loads `track` silently into the standby slot and remembers it as next.
    pub async fn preload(&self, track: Track) -> Result<(), EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.request(EngineCommand::Preload { track, respond_to }, rx).await
    }

    /// Transitions to `next`, resolving once it is the active track.
    pub async fn crossfade_to_next(&self, next: Track) -> Result<(), EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.request(EngineCommand::CrossfadeToNext { next, respond_to }, rx).await
    }

    pub async fn play(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Play).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop).await
    }

    /// Repositions the active item; out-of-range values are clamped.
    pub async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        self.send(EngineCommand::SeekTo { position_ms }).await
    }

    /// Registers a progress callback, invoked on every tracker tick.
    pub async fn subscribe_progress<F>(&self, callback: F) -> Result<ProgressSubscription, EngineError>
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        let (respond_to, rx) = oneshot::channel();
        self.send(EngineCommand::SubscribeProgress {
            listener: ProgressListener::new(callback),
            respond_to,
        })
        .await?;
        let id = rx.await?;
        Ok(ProgressSubscription {
            id,
            command_tx: self.command_tx.clone(),
        })
    }

    /// Receives every engine event from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub async fn update_preferences(&self, update: PreferenceUpdate) -> Result<(), EngineError> {
        self.send(EngineCommand::UpdatePreferences(update)).await
    }

    pub async fn preferences(&self) -> Result<HashMap<MediaType, ContentPreference>, EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(EngineCommand::GetPreferences(respond_to)).await?;
        Ok(rx.await?)
    }

    /// Stops playback and ends the engine task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Shutdown).await
    }

    pub fn state(&self) -> EngineState {
        self.snapshot_rx.borrow().state
    }

    /// Track in the active slot, if any.
    pub fn current_track(&self) -> Option<Track> {
        self.snapshot_rx.borrow().current_track.clone()
    }

    /// Position, duration and play flag of the active handle, or `None`
    /// when nothing is loaded. Refreshed on every tracker tick.
    pub fn status(&self) -> Option<PlaybackStatus> {
        self.snapshot_rx.borrow().status
    }

    /// Waits until the published state satisfies `predicate`.
    pub async fn wait_for_state<P>(&self, predicate: P) -> Result<EngineState, EngineError>
    where
        P: Fn(EngineState) -> bool,
    {
        let mut rx = self.snapshot_rx.clone();
        loop {
            let state = rx.borrow_and_update().state;
            if predicate(state) {
                return Ok(state);
            }
            rx.changed().await.map_err(|_| EngineError::EngineClosed)?;
        }
    }
}

/// Handle returned by [`EngineHandle::subscribe_progress`].
#[derive(Debug)]
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct ProgressSubscription {
    id: u64,
    command_tx: mpsc::Sender<EngineCommand>,
}

impl ProgressSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn unsubscribe(self) -> Result<(), EngineError> {
        self.command_tx.send(EngineCommand::UnsubscribeProgress { id: self.id }).await?;
        Ok(())
    }
}
