//! Command and timer handlers. Each one runs to completion on the engine task.

use super::fade::{FadeEnvelope, Transition};
use super::loader::{self, OpenCompleted, OpenJob};
use super::progress::{self, TickDecision, TriggerWindow};
use super::slots::{OpenPurpose, PendingOpen, SlotId};
use super::state::Responder;
use super::{Engine, EngineCommand, EngineEvent, EngineState, ENGINE_LOG_TARGET};
use crate::audio::{dispose, EngineError, HandleFault};
use crate::media::{ContentPreference, Track};
use tracing::{debug, error, info, instrument, trace, warn};

/// Who asked for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOrigin {
    Caller,
    /// Reload after a mid-playback fault.
    Recovery,
}

fn respond(respond_to: Option<Responder>, result: Result<(), EngineError>) {
    if let Some(tx) = respond_to {
        // The caller may have stopped waiting; that is fine.
        let _ = tx.send(result);
    }
}

pub(super) fn dispatch(engine: &mut Engine, command: EngineCommand) {
    match command {
        EngineCommand::LoadAndPlay { track, preload_next, respond_to } => {
            handle_load_and_play(engine, track, preload_next, Some(respond_to), LoadOrigin::Caller)
        }
        EngineCommand::Preload { track, respond_to } => handle_preload(engine, track, Some(respond_to)),
        EngineCommand::CrossfadeToNext { next, respond_to } => handle_crossfade_to_next(engine, next, Some(respond_to)),
        EngineCommand::Play => handle_play(engine),
        EngineCommand::Pause => handle_pause(engine),
        EngineCommand::Stop | EngineCommand::Shutdown => handle_stop(engine),
        EngineCommand::SeekTo { position_ms } => handle_seek(engine, position_ms),
        EngineCommand::SubscribeProgress { listener, respond_to } => {
            let id = engine.listeners.insert(listener);
            debug!(target: ENGINE_LOG_TARGET, id, total = engine.listeners.len(), "Progress listener registered.");
            let _ = respond_to.send(id);
        }
        EngineCommand::UnsubscribeProgress { id } => {
            if engine.listeners.remove(id) {
                debug!(target: ENGINE_LOG_TARGET, id, "Progress listener removed.");
            } else {
                trace!(target: ENGINE_LOG_TARGET, id, "Unsubscribe for unknown listener ignored.");
            }
        }
        EngineCommand::UpdatePreferences(update) => {
            // Read at the next load or transition; a running fade keeps its envelope.
            engine.preferences.apply(update);
        }
        EngineCommand::GetPreferences(respond_to) => {
            let _ = respond_to.send(engine.preferences.snapshot());
        }
    }
}

// --- Loading ---

/// Resolves `track` and spawns the open into `slot`.
fn start_open(engine: &mut Engine, slot: SlotId, track: Track, purpose: OpenPurpose, respond_to: Option<Responder>) {
    let request_id = engine.next_request_id();
    let source = engine.resolver.resolve(&track);
    let (volume, autoplay) = match purpose {
        OpenPurpose::Play => (1.0, true),
        OpenPurpose::Preload => (0.0, false),
    };
    debug!(target: ENGINE_LOG_TARGET, track_id = %track.id, %slot, request_id, primary = %source.primary, ?purpose, "Starting handle open.");
    let task = loader::spawn_open(
        engine.factory.clone(),
        OpenJob {
            slot,
            request_id,
            track: track.clone(),
            source,
            volume,
            autoplay,
        },
        engine.fault_tx.clone(),
        engine.completed_tx.clone(),
    );
    engine.slots.get_mut(slot).set_pending(PendingOpen {
        request_id,
        track,
        purpose,
        respond_to,
        task: Some(task),
    });
}

#[instrument(skip(engine, track, preload_next, respond_to), fields(track_id = %track.id))]
fn handle_load_and_play(
    engine: &mut Engine,
    track: Track,
    preload_next: Option<Track>,
    respond_to: Option<Responder>,
    origin: LoadOrigin,
) {
    info!(target: ENGINE_LOG_TARGET, ?origin, media_type = %track.media_type, "Handling LoadAndPlay.");
    if origin == LoadOrigin::Caller {
        engine.recovery_attempts = 0;
    }

    // Timers go first so no tick can land on a handle about to be freed.
    let was_fading = cancel_transition(engine, None);
    engine.progress_ticker.disarm();
    if was_fading {
        // The standby slot was partly audible; it belongs to the cancelled fade.
        engine.slots.standby_mut().dispose();
        engine.next_track = None;
    }
    engine.slots.active_mut().dispose();

    engine.effective_pref = engine.preferences.get(track.media_type);
    engine.set_state(EngineState::Loading);
    let active = engine.slots.active_id();
    start_open(engine, active, track, OpenPurpose::Play, respond_to);
    engine.publish_snapshot();

    if let Some(next) = preload_next {
        begin_preload(engine, next, None);
    }
}

#[instrument(skip(engine, track, respond_to), fields(track_id = %track.id))]
fn handle_preload(engine: &mut Engine, track: Track, respond_to: Option<Responder>) {
    if !engine.transition.is_idle() {
        warn!(target: ENGINE_LOG_TARGET, "Preload rejected: standby slot is part of a running transition.");
        respond(respond_to, Err(EngineError::TransitionInProgress));
        return;
    }
    begin_preload(engine, track, respond_to);
}

fn begin_preload(engine: &mut Engine, track: Track, respond_to: Option<Responder>) {
    info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Preloading into standby slot.");
    engine.next_track = None;
    engine.slots.standby_mut().dispose();
    let standby = engine.slots.standby_id();
    start_open(engine, standby, track, OpenPurpose::Preload, respond_to);
}

/// Delivers a finished open to its slot, unless the slot has moved on.
pub(super) fn handle_open_completed(engine: &mut Engine, completed: OpenCompleted) {
    let OpenCompleted { slot, request_id, result } = completed;
    let Some(pending) = engine.slots.get_mut(slot).take_pending(request_id) else {
        debug!(target: ENGINE_LOG_TARGET, %slot, request_id, "Discarding stale open completion.");
        if let Ok(mut opened) = result {
            dispose(opened.handle.as_mut());
        }
        return;
    };

    match result {
        Ok(opened) => {
            if let Some(notice) = opened.fallback_notice {
                warn!(target: ENGINE_LOG_TARGET, track_id = %pending.track.id, "{}", notice);
                engine.emit(EngineEvent::Error(notice));
            }
            let target = engine.slots.get_mut(slot);
            if target.is_live() {
                target.dispose();
            }
            target.install(opened.handle, pending.track.clone(), opened.uri, request_id);
            match pending.purpose {
                OpenPurpose::Play => on_active_ready(engine, pending.track, pending.respond_to),
                OpenPurpose::Preload => on_standby_ready(engine, pending.track, pending.respond_to),
            }
        }
        Err(e) => {
            error!(target: ENGINE_LOG_TARGET, track_id = %pending.track.id, %slot, "Open failed: {}", e);
            engine.emit(EngineEvent::Error(e.clone()));
            match pending.purpose {
                OpenPurpose::Play => {
                    engine.set_state(EngineState::Error);
                    engine.publish_snapshot();
                }
                OpenPurpose::Preload => {
                    let awaited = matches!(&engine.transition, Transition::AwaitingNext { track, .. } if track.id == pending.track.id);
                    if awaited {
                        cancel_transition(engine, Some(e.clone()));
                    }
                }
            }
            respond(pending.respond_to, Err(e));
        }
    }
}

fn on_active_ready(engine: &mut Engine, track: Track, respond_to: Option<Responder>) {
    info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Active slot playing.");
    engine.set_state(EngineState::Playing);
    engine.emit(EngineEvent::TrackStart(track));
    engine.progress_ticker.arm(engine.settings.progress_interval());
    engine.publish_snapshot();
    respond(respond_to, Ok(()));
}

fn on_standby_ready(engine: &mut Engine, track: Track, respond_to: Option<Responder>) {
    info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Standby slot primed.");
    engine.next_track = Some(track.clone());
    respond(respond_to, Ok(()));

    if let Transition::AwaitingNext { track: awaited, .. } = &engine.transition {
        if awaited.id == track.id {
            if let Transition::AwaitingNext { track, respond_to } = std::mem::take(&mut engine.transition) {
                begin_transition(engine, track, respond_to);
            }
        }
    }
}

// --- Transitions ---

#[instrument(skip(engine, next, respond_to), fields(track_id = %next.id))]
fn handle_crossfade_to_next(engine: &mut Engine, next: Track, respond_to: Option<Responder>) {
    if !engine.transition.is_idle() {
        warn!(target: ENGINE_LOG_TARGET, "Crossfade rejected: a transition is already running.");
        respond(respond_to, Err(EngineError::TransitionInProgress));
        return;
    }
    engine.effective_pref = engine.preferences.get(next.media_type);

    let standby = engine.slots.standby();
    if standby.holds(&next.id) {
        begin_transition(engine, next, respond_to);
        return;
    }
    let already_opening = standby
        .pending()
        .map_or(false, |p| p.purpose == OpenPurpose::Preload && p.track.id == next.id);
    if !already_opening {
        begin_preload(engine, next.clone(), None);
    }
    debug!(target: ENGINE_LOG_TARGET, "Waiting for next track to finish loading.");
    engine.transition = Transition::AwaitingNext { track: next, respond_to };
}

/// Starts the handoff to the primed standby slot, either as a cut or a fade.
fn begin_transition(engine: &mut Engine, next: Track, respond_to: Option<Responder>) {
    let crossfade_ms = engine.effective_pref.crossfade_ms;
    if crossfade_ms == 0 || !engine.slots.active().is_live() {
        instant_cut(engine, next, respond_to);
        return;
    }

    let source = engine.slots.active_id();
    let dest = engine.slots.standby_id();
    if let Some(handle) = engine.slots.get_mut(source).handle_mut() {
        handle.play();
    }
    if let Some(handle) = engine.slots.get_mut(dest).handle_mut() {
        handle.set_volume(0.0);
        handle.play();
    }
    let envelope = FadeEnvelope::new(
        source,
        dest,
        crossfade_ms,
        engine.settings.fade_steps,
        engine.settings.min_fade_tick(),
    );
    info!(target: ENGINE_LOG_TARGET, track_id = %next.id, crossfade_ms, steps = envelope.steps(), interval_ms = envelope.interval().as_millis() as u64, "Starting crossfade.");
    engine.fade_ticker.arm(envelope.interval());
    engine.transition = Transition::Fading {
        envelope,
        track: next,
        respond_to,
    };
    engine.set_state(EngineState::Playing);
}

/// Standby jumps to full volume, the old active slot is paused and freed.
fn instant_cut(engine: &mut Engine, next: Track, respond_to: Option<Responder>) {
    info!(target: ENGINE_LOG_TARGET, track_id = %next.id, "Instant cut to standby slot.");
    if let Some(handle) = engine.slots.standby_mut().handle_mut() {
        handle.set_volume(1.0);
        handle.play();
    }
    if let Some(handle) = engine.slots.active_mut().handle_mut() {
        handle.pause();
    }
    let previous = engine.slots.active_id();
    engine.slots.flip();
    engine.slots.get_mut(previous).dispose();
    finish_transition(engine, next, respond_to);
}

fn finish_transition(engine: &mut Engine, track: Track, respond_to: Option<Responder>) {
    engine.next_track = None;
    engine.recovery_attempts = 0;
    engine.set_state(EngineState::Playing);
    engine.emit(EngineEvent::TrackStart(track));
    engine.progress_ticker.arm(engine.settings.progress_interval());
    engine.publish_snapshot();
    respond(respond_to, Ok(()));
}

/// Abandons any running transition and fails its caller with `error`
/// (or `Superseded`). A half-finished fade has its source restored to full
/// volume. Returns whether a fade was running.
fn cancel_transition(engine: &mut Engine, error: Option<EngineError>) -> bool {
    engine.fade_ticker.disarm();
    match std::mem::take(&mut engine.transition) {
        Transition::Idle => false,
        Transition::AwaitingNext { track, respond_to } => {
            debug!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Cancelling pending transition.");
            respond(respond_to, Err(error.unwrap_or(EngineError::Superseded { track_id: track.id })));
            false
        }
        Transition::Fading { envelope, track, respond_to } => {
            info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Cancelling crossfade in flight.");
            if let Some(handle) = engine.slots.get_mut(envelope.source()).handle_mut() {
                handle.set_volume(1.0);
            }
            respond(respond_to, Err(error.unwrap_or(EngineError::Superseded { track_id: track.id })));
            true
        }
    }
}

/// One envelope step. Flips the slots once the envelope completes.
pub(super) fn handle_fade_tick(engine: &mut Engine) {
    let Transition::Fading { envelope, .. } = &mut engine.transition else {
        engine.fade_ticker.disarm();
        return;
    };
    let step = envelope.advance();
    let (source, dest) = (envelope.source(), envelope.dest());
    trace!(target: ENGINE_LOG_TARGET, step = step.step, source_volume = step.source_volume, dest_volume = step.dest_volume, "Fade step.");

    if let Some(handle) = engine.slots.get_mut(source).handle_mut() {
        handle.set_volume(step.source_volume);
    }
    if let Some(handle) = engine.slots.get_mut(dest).handle_mut() {
        handle.set_volume(step.dest_volume);
    }

    if step.finished {
        engine.fade_ticker.disarm();
        if let Transition::Fading { track, respond_to, .. } = std::mem::take(&mut engine.transition) {
            info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Crossfade complete.");
            engine.slots.get_mut(source).dispose();
            engine.slots.flip();
            finish_transition(engine, track, respond_to);
        }
    }
}

// --- Transport ---

fn handle_play(engine: &mut Engine) {
    let Some(handle) = engine.slots.active_mut().handle_mut() else {
        debug!(target: ENGINE_LOG_TARGET, "Play ignored: no active handle.");
        return;
    };
    handle.play();
    if let Transition::Fading { envelope, .. } = &engine.transition {
        if !engine.fade_ticker.is_armed() {
            let interval = envelope.interval();
            if let Some(standby) = engine.slots.standby_mut().handle_mut() {
                standby.play();
            }
            engine.fade_ticker.arm(interval);
        }
    }
    engine.set_state(EngineState::Playing);
    engine.publish_snapshot();
}

fn handle_pause(engine: &mut Engine) {
    let Some(handle) = engine.slots.active_mut().handle_mut() else {
        debug!(target: ENGINE_LOG_TARGET, "Pause ignored: no active handle.");
        return;
    };
    handle.pause();
    if engine.transition.is_fading() {
        // Both halves of the fade hold still until play resumes them.
        if let Some(standby) = engine.slots.standby_mut().handle_mut() {
            standby.pause();
        }
        engine.fade_ticker.disarm();
    }
    engine.set_state(EngineState::Paused);
    engine.publish_snapshot();
}

#[instrument(skip(engine))]
fn handle_stop(engine: &mut Engine) {
    info!(target: ENGINE_LOG_TARGET, "Handling Stop.");
    cancel_transition(engine, None);
    engine.progress_ticker.disarm();
    engine.slots.dispose_all();
    engine.next_track = None;
    engine.set_state(EngineState::Stopped);
    engine.publish_snapshot();
}

/// Releases both slots before the run loop exits.
pub(super) fn cleanup(engine: &mut Engine) {
    handle_stop(engine);
    debug!(target: ENGINE_LOG_TARGET, listeners = engine.listeners.len(), "Dropping progress listeners.");
    engine.listeners = Default::default();
}

fn handle_seek(engine: &mut Engine, position_ms: i64) {
    let slot = engine.slots.active_mut();
    let hint = slot.track().and_then(|t| t.duration_hint_ms);
    let Some(handle) = slot.handle_mut() else {
        debug!(target: ENGINE_LOG_TARGET, "Seek ignored: no active handle.");
        return;
    };
    let target = match handle.duration_ms().or(hint) {
        Some(duration) => position_ms.clamp(0, i64::try_from(duration).unwrap_or(i64::MAX)) as u64,
        None => position_ms.max(0) as u64,
    };
    debug!(target: ENGINE_LOG_TARGET, requested = position_ms, target, "Seeking active handle.");
    handle.seek_ms(target);

    // A seek back from the end resumes sampling.
    if !engine.progress_ticker.is_armed() && matches!(engine.state, EngineState::Playing | EngineState::Paused) {
        engine.progress_ticker.arm(engine.settings.progress_interval());
    }
    engine.publish_snapshot();
}

// --- Progress ---

/// Preference that governs the handoff to the next track: the incoming
/// track's type decides, falling back to the current one with no next track.
fn incoming_pref(engine: &Engine) -> ContentPreference {
    engine
        .next_track
        .as_ref()
        .map_or(engine.effective_pref, |next| engine.preferences.get(next.media_type))
}

fn next_ready(engine: &Engine) -> bool {
    engine
        .next_track
        .as_ref()
        .map_or(false, |next| engine.slots.standby().holds(&next.id))
}

/// Samples the active handle, fans the snapshot out and applies the
/// auto-transition rule.
pub(super) fn handle_progress_tick(engine: &mut Engine) {
    let slot = engine.slots.active();
    let Some(handle) = slot.handle() else {
        engine.progress_ticker.disarm();
        return;
    };
    let snapshot = progress::sample(handle, slot.track().and_then(|t| t.duration_hint_ms));
    engine.listeners.notify(snapshot);
    engine.emit(EngineEvent::Progress(snapshot));
    engine.publish_snapshot();

    let window = TriggerWindow {
        crossfade_ms: incoming_pref(engine).crossfade_ms,
        tolerance_ms: engine.settings.trigger_tolerance_ms,
        end_epsilon_ms: engine.settings.end_epsilon_ms,
        next_ready: next_ready(engine),
        transition_idle: engine.transition.is_idle(),
    };
    match progress::decide(&snapshot, &window) {
        TickDecision::Continue => {}
        TickDecision::StartCrossfade => {
            if let Some(next) = engine.next_track.clone() {
                info!(target: ENGINE_LOG_TARGET, remaining_ms = snapshot.remaining_ms(), next_id = %next.id, "Crossfade window reached, starting automatic transition.");
                handle_crossfade_to_next(engine, next, None);
            }
        }
        TickDecision::Ended => handle_track_ended(engine),
    }
}

fn handle_track_ended(engine: &mut Engine) {
    engine.progress_ticker.disarm();
    if let Some(track) = engine.slots.active().track().cloned() {
        info!(target: ENGINE_LOG_TARGET, track_id = %track.id, "Active track ended.");
        engine.emit(EngineEvent::TrackEnd(track));
    }

    let pref = incoming_pref(engine);
    if pref.is_instant() && pref.gapless && engine.transition.is_idle() && next_ready(engine) {
        if let Some(next) = engine.next_track.clone() {
            info!(target: ENGINE_LOG_TARGET, next_id = %next.id, "Gapless handoff to preloaded track.");
            engine.effective_pref = pref;
            instant_cut(engine, next, None);
        }
    }
}

// --- Faults ---

/// Routes a mid-playback fault. Faults from handles that are no longer
/// authoritative are logged and swallowed.
#[instrument(skip(engine, fault), fields(track_id = %fault.track_id, request_id = fault.request_id))]
pub(super) fn handle_fault(engine: &mut Engine, fault: HandleFault) {
    let Some(slot_id) = engine.slots.find_by_request(fault.request_id) else {
        info!(target: ENGINE_LOG_TARGET, "Ignoring stale fault: {}", fault.reason);
        return;
    };
    let Some(track) = engine.slots.get(slot_id).track().cloned() else {
        return;
    };
    if track.id != fault.track_id {
        info!(target: ENGINE_LOG_TARGET, "Ignoring fault for replaced track: {}", fault.reason);
        return;
    }

    if slot_id == engine.slots.standby_id() {
        warn!(target: ENGINE_LOG_TARGET, "Standby handle failed, dropping preloaded track: {}", fault.reason);
        if engine.transition.is_fading() {
            cancel_transition(
                engine,
                Some(EngineError::Playback {
                    track_id: track.id.clone(),
                    reason: fault.reason.clone(),
                }),
            );
        }
        engine.slots.get_mut(slot_id).dispose();
        engine.next_track = None;
        return;
    }

    let error = EngineError::Playback {
        track_id: track.id.clone(),
        reason: fault.reason,
    };
    error!(target: ENGINE_LOG_TARGET, "{}", error);
    engine.emit(EngineEvent::Error(error.clone()));

    if engine.recovery_attempts < engine.settings.max_recovery_attempts {
        engine.recovery_attempts += 1;
        info!(target: ENGINE_LOG_TARGET, attempt = engine.recovery_attempts, "Reloading faulted track.");
        handle_load_and_play(engine, track, None, None, LoadOrigin::Recovery);
    } else {
        error!(target: ENGINE_LOG_TARGET, attempts = engine.recovery_attempts, "Recovery budget exhausted.");
        cancel_transition(engine, Some(error));
        engine.progress_ticker.disarm();
        engine.slots.active_mut().dispose();
        engine.set_state(EngineState::Error);
        engine.publish_snapshot();
    }
}
