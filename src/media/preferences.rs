//! Per media-type transition defaults.

use crate::media::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

const LOG_TARGET: &str = "r_crossfader::media::preferences";

pub const DEFAULT_SONG_CROSSFADE_MS: u64 = 6000;
/// Longest crossfade the store will hold. Larger requests are clamped.
pub const MAX_CROSSFADE_MS: u64 = 60_000;

/// How transitions into an item of a given type should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPreference {
    pub crossfade_ms: u64,
    pub gapless: bool,
}

impl ContentPreference {
    pub fn defaults_for(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Song => ContentPreference {
                crossfade_ms: DEFAULT_SONG_CROSSFADE_MS,
                gapless: true,
            },
            MediaType::Podcast | MediaType::Audiobook | MediaType::Video => ContentPreference {
                crossfade_ms: 0,
                gapless: false,
            },
        }
    }

    /// Same preference with the crossfade clamped to [`MAX_CROSSFADE_MS`].
    pub fn clamped(self) -> Self {
        ContentPreference {
            crossfade_ms: self.crossfade_ms.min(MAX_CROSSFADE_MS),
            ..self
        }
    }

    /// Zero crossfade means an instant cut.
    pub fn is_instant(&self) -> bool {
        self.crossfade_ms == 0
    }
}

/// Ad hoc change to one media type's preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdate {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub crossfade_ms: Option<u64>,
    #[serde(default)]
    pub gapless: Option<bool>,
}

/// Runtime table of preferences, read fresh at every load and transition.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    prefs: HashMap<MediaType, ContentPreference>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        let prefs = MediaType::ALL
            .iter()
            .map(|mt| (*mt, ContentPreference::defaults_for(*mt)))
            .collect();
        Self { prefs }
    }

    /// Defaults with the given entries replaced.
    pub fn with_overrides(overrides: &HashMap<MediaType, ContentPreference>) -> Self {
        let mut store = Self::new();
        for (media_type, pref) in overrides {
            store.prefs.insert(*media_type, pref.clamped());
        }
        store
    }

    pub fn get(&self, media_type: MediaType) -> ContentPreference {
        self.prefs
            .get(&media_type)
            .copied()
            .unwrap_or_else(|| ContentPreference::defaults_for(media_type))
    }

    /// Applies an update and returns the resulting preference.
    pub fn apply(&mut self, update: PreferenceUpdate) -> ContentPreference {
        let mut pref = self.get(update.media_type);
        if let Some(crossfade_ms) = update.crossfade_ms {
            pref.crossfade_ms = crossfade_ms;
        }
        if let Some(gapless) = update.gapless {
            pref.gapless = gapless;
        }
        let pref = pref.clamped();
        info!(target: LOG_TARGET, media_type = %update.media_type, crossfade_ms = pref.crossfade_ms, gapless = pref.gapless, "Content preference updated.");
        self.prefs.insert(update.media_type, pref);
        pref
    }

    pub fn snapshot(&self) -> HashMap<MediaType, ContentPreference> {
        self.prefs.clone()
    }
}

impl Default for PreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}
