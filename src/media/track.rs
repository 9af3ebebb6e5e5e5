//! Data models for playable media items

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of media kinds the engine knows how to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Song,
    Podcast,
    Audiobook,
    Video,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Song,
        MediaType::Podcast,
        MediaType::Audiobook,
        MediaType::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Song => "song",
            MediaType::Podcast => "podcast",
            MediaType::Audiobook => "audiobook",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media item supplied by the caller. The engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// Local file path or `file://` URI
    #[serde(default)]
    pub local_uri: Option<String>,
    #[serde(default)]
    pub remote_audio_uri: Option<String>,
    /// Audio track of a video source; only consulted for `video` items
    #[serde(default)]
    pub remote_video_uri: Option<String>,
    #[serde(default)]
    pub duration_hint_ms: Option<u64>,
}

impl Track {
    pub fn new(id: impl Into<String>, media_type: MediaType) -> Self {
        Track {
            id: id.into(),
            media_type,
            local_uri: None,
            remote_audio_uri: None,
            remote_video_uri: None,
            duration_hint_ms: None,
        }
    }

    pub fn with_local_uri(mut self, uri: impl Into<String>) -> Self {
        self.local_uri = Some(uri.into());
        self
    }

    pub fn with_remote_audio_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_audio_uri = Some(uri.into());
        self
    }

    pub fn with_remote_video_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_video_uri = Some(uri.into());
        self
    }

    pub fn with_duration_hint_ms(mut self, duration_ms: u64) -> Self {
        self.duration_hint_ms = Some(duration_ms);
        self
    }
}
