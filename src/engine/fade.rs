//! Stepped linear volume envelope for crossfades.

use crate::engine::slots::SlotId;
use crate::engine::state::Responder;
use crate::media::Track;
use std::time::Duration;

/// Volumes to apply after one envelope step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStep {
    pub step: u32,
    pub source_volume: f32,
    pub dest_volume: f32,
    pub finished: bool,
}

/// Ramps `source` down and `dest` up over a fixed number of steps.
/// `source_volume + dest_volume == 1` after every step.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeEnvelope {
    source: SlotId,
    dest: SlotId,
    steps: u32,
    step: u32,
    interval: Duration,
}

impl FadeEnvelope {
    pub fn new(source: SlotId, dest: SlotId, duration_ms: u64, steps: u32, min_tick: Duration) -> Self {
        let steps = steps.max(1);
        let per_step = Duration::from_millis(duration_ms / u64::from(steps));
        FadeEnvelope {
            source,
            dest,
            steps,
            step: 0,
            interval: per_step.max(min_tick),
        }
    }

    pub fn source(&self) -> SlotId {
        self.source
    }

    pub fn dest(&self) -> SlotId {
        self.dest
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.steps
    }

    /// Advances one step. Calling past the end keeps returning the final step.
    pub fn advance(&mut self) -> FadeStep {
        if self.step < self.steps {
            self.step += 1;
        }
        let dest_volume = self.step as f32 / self.steps as f32;
        FadeStep {
            step: self.step,
            source_volume: 1.0 - dest_volume,
            dest_volume,
            finished: self.is_finished(),
        }
    }
}

/// Transition sub-state. Only `Idle` accepts a new crossfade, so two
/// envelopes can never run over the same slots.
#[derive(Debug, Default)]
pub(crate) enum Transition {
    #[default]
    Idle,
    /// The next track is still opening into the standby slot.
    AwaitingNext {
        track: Track,
        respond_to: Option<Responder>,
    },
    Fading {
        envelope: FadeEnvelope,
        track: Track,
        respond_to: Option<Responder>,
    },
}

impl Transition {
    pub fn is_idle(&self) -> bool {
        matches!(self, Transition::Idle)
    }

    pub fn is_fading(&self) -> bool {
        matches!(self, Transition::Fading { .. })
    }
}
