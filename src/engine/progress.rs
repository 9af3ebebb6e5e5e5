use crate::audio::PlaybackHandle;
use crate::engine::state::{ProgressListener, ProgressSnapshot};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Shortest period a [`Ticker`] will run at.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);
/// Longest period a [`Ticker`] will run at.
pub(crate) const MAX_TICK: Duration = Duration::from_secs(3600);

/// A periodic timer that can be armed and disarmed from the run loop.
/// While disarmed, `tick` never completes.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    /// (Re)starts the timer. The first tick fires one `period` from now.
    /// `period` is clamped to `MIN_TICK..=MAX_TICK`.
    pub fn arm(&mut self, period: Duration) {
        let period = period.clamp(MIN_TICK, MAX_TICK);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        self.interval = Some(interval);
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Reads one snapshot from a handle. Without a real buffered range the
/// whole duration counts as buffered.
pub(crate) fn sample(handle: &dyn PlaybackHandle, duration_hint_ms: Option<u64>) -> ProgressSnapshot {
    let duration_ms = handle.duration_ms().or(duration_hint_ms).unwrap_or(0);
    let position_ms = if duration_ms > 0 {
        handle.position_ms().min(duration_ms)
    } else {
        handle.position_ms()
    };
    ProgressSnapshot {
        position_ms,
        duration_ms,
        buffered_ms: handle.buffered_ms().unwrap_or(duration_ms),
    }
}

/// What the tracker should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickDecision {
    Continue,
    /// Remaining time has entered the crossfade window.
    StartCrossfade,
    /// The active track reached its end.
    Ended,
}

/// Inputs to the auto-transition rule beyond the snapshot itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TriggerWindow {
    pub crossfade_ms: u64,
    pub tolerance_ms: u64,
    pub end_epsilon_ms: u64,
    /// A next track is loaded in the standby slot.
    pub next_ready: bool,
    /// No transition is running.
    pub transition_idle: bool,
}

pub(crate) fn decide(snapshot: &ProgressSnapshot, window: &TriggerWindow) -> TickDecision {
    if snapshot.duration_ms == 0 {
        return TickDecision::Continue;
    }
    let remaining = snapshot.remaining_ms();
    if window.crossfade_ms > 0
        && window.next_ready
        && window.transition_idle
        && remaining <= window.crossfade_ms.saturating_add(window.tolerance_ms)
    {
        return TickDecision::StartCrossfade;
    }
    if remaining <= window.end_epsilon_ms {
        return TickDecision::Ended;
    }
    TickDecision::Continue
}

/// Independent progress listeners keyed by subscription id.
#[derive(Debug, Default)]
pub(crate) struct ProgressRegistry {
    next_id: u64,
    listeners: BTreeMap<u64, ProgressListener>,
}

impl ProgressRegistry {
    pub fn insert(&mut self, listener: ProgressListener) -> u64 {
        self.next_id += 1;
        self.listeners.insert(self.next_id, listener);
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify(&self, snapshot: ProgressSnapshot) {
        for listener in self.listeners.values() {
            listener.notify(snapshot);
        }
    }
}
