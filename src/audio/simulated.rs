//! Clock-driven playback backend with no audio device behind it.
//!
//! Position advances with `tokio::time`, so a paused test runtime drives it
//! deterministically. The backend also keeps books on live handles and lets
//! callers mark URIs unreachable or inject mid-playback faults.

use crate::audio::error::EngineError;
use crate::audio::handle::{FaultReporter, HandleFactory, OpenRequest, PlaybackHandle};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

const LOG_TARGET: &str = "r_crossfader::audio::simulated";

pub const DEFAULT_SIMULATED_DURATION_MS: u64 = 180_000;

#[derive(Debug)]
struct BackendState {
    default_duration_ms: u64,
    durations: HashMap<String, u64>,
    unreachable: HashSet<String>,
    open_delay: Duration,
    next_handle_id: u64,
    live: HashMap<u64, LiveEntry>,
    peak_live: usize,
    opened: Vec<String>,
}

#[derive(Debug)]
struct LiveEntry {
    uri: String,
    faults: FaultReporter,
    volume: f32,
    playing: bool,
}

/// Factory for [`SimulatedHandle`]s. Cloning shares the same bookkeeping.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    state: Arc<Mutex<BackendState>>,
}

fn lock(state: &Mutex<BackendState>) -> MutexGuard<'_, BackendState> {
    // A panic while holding the lock leaves plain bookkeeping behind; keep going.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedBackend {
    pub fn new(default_duration_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                default_duration_ms,
                durations: HashMap::new(),
                unreachable: HashSet::new(),
                open_delay: Duration::ZERO,
                next_handle_id: 1,
                live: HashMap::new(),
                peak_live: 0,
                opened: Vec::new(),
            })),
        }
    }

    pub fn set_duration(&self, uri: impl Into<String>, duration_ms: u64) {
        lock(&self.state).durations.insert(uri.into(), duration_ms);
    }

    /// Opening this URI fails until [`mark_reachable`](Self::mark_reachable).
    pub fn mark_unreachable(&self, uri: impl Into<String>) {
        lock(&self.state).unreachable.insert(uri.into());
    }

    pub fn mark_reachable(&self, uri: &str) {
        lock(&self.state).unreachable.remove(uri);
    }

    /// Simulated latency of every open.
    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.state).open_delay = delay;
    }

    pub fn live_handles(&self) -> usize {
        lock(&self.state).live.len()
    }

    /// Highest number of simultaneously live handles seen so far.
    pub fn peak_live_handles(&self) -> usize {
        lock(&self.state).peak_live
    }

    /// URIs of every successful open, in order.
    pub fn opened_uris(&self) -> Vec<String> {
        lock(&self.state).opened.clone()
    }

    /// Volume of the most recently opened live handle on `uri`.
    pub fn volume_of(&self, uri: &str) -> Option<f32> {
        self.live_entry(uri, |entry| entry.volume)
    }

    /// Whether the most recently opened live handle on `uri` is playing.
    pub fn is_playing(&self, uri: &str) -> Option<bool> {
        self.live_entry(uri, |entry| entry.playing)
    }

    fn live_entry<T>(&self, uri: &str, read: impl Fn(&LiveEntry) -> T) -> Option<T> {
        let state = lock(&self.state);
        state
            .live
            .iter()
            .filter(|(_, entry)| entry.uri == uri)
            .max_by_key(|(id, _)| **id)
            .map(|(_, entry)| read(entry))
    }

    /// Makes every live handle on `uri` report a playback fault.
    /// Returns how many handles were affected.
    pub fn inject_fault(&self, uri: &str, reason: &str) -> usize {
        let reporters: Vec<FaultReporter> = lock(&self.state)
            .live
            .values()
            .filter(|entry| entry.uri == uri)
            .map(|entry| entry.faults.clone())
            .collect();
        for reporter in &reporters {
            reporter.report(reason);
        }
        reporters.len()
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_DURATION_MS)
    }
}

#[async_trait]
impl HandleFactory for SimulatedBackend {
    async fn open(&self, request: OpenRequest) -> Result<Box<dyn PlaybackHandle>, EngineError> {
        let delay = lock(&self.state).open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.unreachable.contains(&request.uri) {
            debug!(target: LOG_TARGET, uri = %request.uri, "Refusing to open unreachable URI.");
            return Err(EngineError::HandleOpen {
                uri: request.uri,
                reason: "source unreachable".to_string(),
            });
        }

        let id = state.next_handle_id;
        state.next_handle_id += 1;
        let duration_ms = state
            .durations
            .get(&request.uri)
            .copied()
            .unwrap_or(state.default_duration_ms);
        state.live.insert(
            id,
            LiveEntry {
                uri: request.uri.clone(),
                faults: request.faults.clone(),
                volume: request.volume.clamp(0.0, 1.0),
                playing: false,
            },
        );
        state.peak_live = state.peak_live.max(state.live.len());
        state.opened.push(request.uri.clone());
        info!(target: LOG_TARGET, handle_id = id, uri = %request.uri, duration_ms, "Opened simulated handle.");
        drop(state);

        let mut handle = SimulatedHandle {
            id,
            uri: request.uri,
            volume: request.volume.clamp(0.0, 1.0),
            duration_ms,
            base_position_ms: 0,
            started_at: None,
            released: false,
            backend: Arc::clone(&self.state),
        };
        if request.autoplay {
            handle.play();
        }
        Ok(Box::new(handle))
    }
}

/// A handle whose position is wall-clock time since `play`, capped at its duration.
#[derive(Debug)]
pub struct SimulatedHandle {
    id: u64,
    uri: String,
    volume: f32,
    duration_ms: u64,
    base_position_ms: u64,
    started_at: Option<Instant>,
    released: bool,
    backend: Arc<Mutex<BackendState>>,
}

impl SimulatedHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn sync_entry(&self) {
        if let Some(entry) = lock(&self.backend).live.get_mut(&self.id) {
            entry.volume = self.volume;
            entry.playing = self.started_at.is_some();
        }
    }
}

impl PlaybackHandle for SimulatedHandle {
    fn play(&mut self) {
        if self.released || self.started_at.is_some() {
            return;
        }
        trace!(target: LOG_TARGET, handle_id = self.id, "play");
        self.started_at = Some(Instant::now());
        self.sync_entry();
    }

    fn pause(&mut self) {
        if self.started_at.is_some() {
            trace!(target: LOG_TARGET, handle_id = self.id, "pause");
            self.base_position_ms = self.position_ms();
            self.started_at = None;
            self.sync_entry();
        }
    }

    fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.sync_entry();
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn position_ms(&self) -> u64 {
        let elapsed = self
            .started_at
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);
        (self.base_position_ms + elapsed).min(self.duration_ms)
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.duration_ms)
    }

    fn seek_ms(&mut self, position_ms: u64) {
        self.base_position_ms = position_ms.min(self.duration_ms);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.started_at = None;
        lock(&self.backend).live.remove(&self.id);
        debug!(target: LOG_TARGET, handle_id = self.id, uri = %self.uri, "Released simulated handle.");
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.release();
    }
}
