//! Maps tracks to playable URIs, with a canned fallback per media type.

use crate::media::{MediaType, Track};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::trace;
use url::Url;

const LOG_TARGET: &str = "r_crossfader::media::resolver";

/// Always-available sources used when a track's own source cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackUris {
    #[serde(default = "default_song_fallback")]
    pub song: String,
    #[serde(default = "default_podcast_fallback")]
    pub podcast: String,
    #[serde(default = "default_audiobook_fallback")]
    pub audiobook: String,
    #[serde(default = "default_video_fallback")]
    pub video: String,
}

fn default_song_fallback() -> String {
    "asset://fallback/song.mp3".to_string()
}

fn default_podcast_fallback() -> String {
    "asset://fallback/podcast.mp3".to_string()
}

fn default_audiobook_fallback() -> String {
    "asset://fallback/audiobook.mp3".to_string()
}

fn default_video_fallback() -> String {
    "asset://fallback/video.mp3".to_string()
}

impl Default for FallbackUris {
    fn default() -> Self {
        FallbackUris {
            song: default_song_fallback(),
            podcast: default_podcast_fallback(),
            audiobook: default_audiobook_fallback(),
            video: default_video_fallback(),
        }
    }
}

impl FallbackUris {
    pub fn get(&self, media_type: MediaType) -> &str {
        match media_type {
            MediaType::Song => &self.song,
            MediaType::Podcast => &self.podcast,
            MediaType::Audiobook => &self.audiobook,
            MediaType::Video => &self.video,
        }
    }
}

/// Primary and fallback URI for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub primary: String,
    pub fallback: String,
}

impl ResolvedSource {
    /// A retry only makes sense when the fallback differs from what was tried.
    pub fn has_distinct_fallback(&self) -> bool {
        self.primary != self.fallback
    }
}

#[derive(Debug, Clone, Default)]
pub struct FallbackResolver {
    fallbacks: FallbackUris,
}

impl FallbackResolver {
    pub fn new(fallbacks: FallbackUris) -> Self {
        Self { fallbacks }
    }

    pub fn fallback_uri(&self, media_type: MediaType) -> &str {
        self.fallbacks.get(media_type)
    }

    /// Picks the primary URI in priority order: local file, type-specific
    /// remote source, generic remote audio, then the type's fallback.
    pub fn primary_uri(&self, track: &Track) -> String {
        if let Some(local) = non_empty(&track.local_uri) {
            return local_to_uri(local);
        }
        if track.media_type == MediaType::Video {
            if let Some(video) = non_empty(&track.remote_video_uri) {
                return video.to_string();
            }
        }
        if let Some(remote) = non_empty(&track.remote_audio_uri) {
            return remote.to_string();
        }
        trace!(target: LOG_TARGET, track_id = %track.id, "No source on track, using fallback as primary.");
        self.fallback_uri(track.media_type).to_string()
    }

    pub fn resolve(&self, track: &Track) -> ResolvedSource {
        ResolvedSource {
            primary: self.primary_uri(track),
            fallback: self.fallback_uri(track.media_type).to_string(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Absolute paths become `file://` URIs; anything with a scheme is kept.
fn local_to_uri(local: &str) -> String {
    if local.contains("://") {
        return local.to_string();
    }
    let path = Path::new(local);
    if path.is_absolute() {
        if let Ok(url) = Url::from_file_path(path) {
            return url.to_string();
        }
    }
    local.to_string()
}
