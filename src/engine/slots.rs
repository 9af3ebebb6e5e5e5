//! The two playback slots and their pending opens.

use crate::audio::{dispose, EngineError, PlaybackHandle};
use crate::engine::state::Responder;
use crate::media::Track;
use crate::engine::ENGINE_LOG_TARGET;
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Label of one of the two fixed slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::A => f.write_str("A"),
            SlotId::B => f.write_str("B"),
        }
    }
}

/// Why a handle is being opened into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenPurpose {
    /// Audible playback in the active slot.
    Play,
    /// Silent priming of the standby slot.
    Preload,
}

/// An open that has been started but not yet delivered.
#[derive(Debug)]
pub(crate) struct PendingOpen {
    pub request_id: u64,
    pub track: Track,
    pub purpose: OpenPurpose,
    pub respond_to: Option<Responder>,
    /// The spawned open, aborted if this request is superseded.
    pub task: Option<JoinHandle<()>>,
}

/// Holds at most one live handle plus the track and URI it came from.
#[derive(Default)]
pub(crate) struct Slot {
    handle: Option<Box<dyn PlaybackHandle>>,
    track: Option<Track>,
    uri: Option<String>,
    request_id: u64,
    pending: Option<PendingOpen>,
}

impl Slot {
    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn handle(&self) -> Option<&dyn PlaybackHandle> {
        self.handle.as_deref()
    }

    pub fn handle_mut(&mut self) -> Option<&mut (dyn PlaybackHandle + 'static)> {
        self.handle.as_deref_mut()
    }

    /// Live handle holding `track_id`, if any.
    pub fn holds(&self, track_id: &str) -> bool {
        self.is_live() && self.track.as_ref().map(|t| t.id.as_str()) == Some(track_id)
    }

    pub fn pending(&self) -> Option<&PendingOpen> {
        self.pending.as_ref()
    }

    pub fn set_pending(&mut self, pending: PendingOpen) {
        self.supersede_pending();
        self.pending = Some(pending);
    }

    /// Takes the pending open if it matches `request_id`.
    pub fn take_pending(&mut self, request_id: u64) -> Option<PendingOpen> {
        match &self.pending {
            Some(p) if p.request_id == request_id => self.pending.take(),
            _ => None,
        }
    }

    /// Installs a freshly opened handle. The slot must already be empty.
    pub fn install(&mut self, handle: Box<dyn PlaybackHandle>, track: Track, uri: String, request_id: u64) {
        debug_assert!(self.handle.is_none(), "slot overwritten while holding a live handle");
        self.handle = Some(handle);
        self.track = Some(track);
        self.uri = Some(uri);
        self.request_id = request_id;
    }

    /// Pause-then-release the handle, fail any pending open and clear the slot.
    /// Returns the track that was loaded, if any.
    pub fn dispose(&mut self) -> Option<Track> {
        self.supersede_pending();
        if let Some(mut handle) = self.handle.take() {
            trace!(target: ENGINE_LOG_TARGET, uri = ?self.uri, "Disposing slot handle.");
            dispose(handle.as_mut());
        }
        self.uri = None;
        self.track.take()
    }

    fn supersede_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(target: ENGINE_LOG_TARGET, track_id = %pending.track.id, request_id = pending.request_id, "Superseding pending open.");
            if let Some(task) = pending.task {
                task.abort();
            }
            if let Some(tx) = pending.respond_to {
                let _ = tx.send(Err(EngineError::Superseded { track_id: pending.track.id }));
            }
        }
    }
}

/// Exactly two slots and the pointer to the audible one.
pub(crate) struct SlotPair {
    slots: [Slot; 2],
    active: SlotId,
}

impl SlotPair {
    pub fn new() -> Self {
        SlotPair {
            slots: [Slot::default(), Slot::default()],
            active: SlotId::A,
        }
    }

    pub fn active_id(&self) -> SlotId {
        self.active
    }

    pub fn standby_id(&self) -> SlotId {
        self.active.other()
    }

    pub fn get(&self, id: SlotId) -> &Slot {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.slots[id.index()]
    }

    pub fn active(&self) -> &Slot {
        self.get(self.active)
    }

    pub fn active_mut(&mut self) -> &mut Slot {
        self.get_mut(self.active)
    }

    pub fn standby(&self) -> &Slot {
        self.get(self.standby_id())
    }

    pub fn standby_mut(&mut self) -> &mut Slot {
        self.get_mut(self.standby_id())
    }

    /// Swaps active and standby in one step.
    pub fn flip(&mut self) {
        self.active = self.active.other();
        debug!(target: ENGINE_LOG_TARGET, active = %self.active, "Active slot flipped.");
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    pub fn dispose_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.dispose();
        }
    }

    /// Slot whose installed handle came from `request_id`.
    pub fn find_by_request(&self, request_id: u64) -> Option<SlotId> {
        [SlotId::A, SlotId::B]
            .into_iter()
            .find(|id| self.get(*id).is_live() && self.get(*id).request_id == request_id)
    }
}

impl Default for SlotPair {
    fn default() -> Self {
        Self::new()
    }
}
