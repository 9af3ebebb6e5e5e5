//! Engine settings and configuration management

use crate::media::{ContentPreference, FallbackUris, MediaType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// How often the progress tracker samples the active handle
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Number of volume steps in a crossfade envelope
    #[serde(default = "default_fade_steps")]
    pub fade_steps: u32,
    /// Shortest interval between two envelope steps
    #[serde(default = "default_min_fade_tick_ms")]
    pub min_fade_tick_ms: u64,
    /// Slack added to the auto-crossfade window to absorb tick jitter
    #[serde(default = "default_trigger_tolerance_ms")]
    pub trigger_tolerance_ms: u64,
    /// Distance from the end at which a track counts as finished
    #[serde(default = "default_end_epsilon_ms")]
    pub end_epsilon_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Consecutive reloads allowed after mid-playback faults
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default)]
    pub fallback_uris: FallbackUris,
    /// Overrides for the built-in per-type preferences
    #[serde(default)]
    pub preferences: HashMap<MediaType, ContentPreference>,
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_fade_steps() -> u32 {
    24
}

fn default_min_fade_tick_ms() -> u64 {
    16
}

fn default_trigger_tolerance_ms() -> u64 {
    150
}

fn default_end_epsilon_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    256
}

fn default_command_buffer() -> usize {
    64
}

fn default_max_recovery_attempts() -> u32 {
    3
}

/// Error types for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    ParseError(String),
    ValidationError(String),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(s) => write!(f, "Parse error: {}", s),
            ConfigError::ValidationError(s) => write!(f, "Validation error: {}", s),
        }
    }
}

impl Error for ConfigError {}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            progress_interval_ms: default_progress_interval_ms(),
            fade_steps: default_fade_steps(),
            min_fade_tick_ms: default_min_fade_tick_ms(),
            trigger_tolerance_ms: default_trigger_tolerance_ms(),
            end_epsilon_ms: default_end_epsilon_ms(),
            event_capacity: default_event_capacity(),
            command_buffer: default_command_buffer(),
            max_recovery_attempts: default_max_recovery_attempts(),
            fallback_uris: FallbackUris::default(),
            preferences: HashMap::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: EngineSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("r-crossfader").join("engine.json")
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_interval_ms == 0 {
            return Err(ConfigError::ValidationError("Progress interval must be greater than zero".to_string()));
        }
        if self.fade_steps == 0 {
            return Err(ConfigError::ValidationError("Fade steps must be greater than zero".to_string()));
        }
        if self.min_fade_tick_ms == 0 {
            return Err(ConfigError::ValidationError("Minimum fade tick must be greater than zero".to_string()));
        }
        if self.event_capacity == 0 || self.command_buffer == 0 {
            return Err(ConfigError::ValidationError("Channel capacities must be greater than zero".to_string()));
        }
        for media_type in MediaType::ALL {
            if self.fallback_uris.get(media_type).trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Fallback URI for {} cannot be empty",
                    media_type
                )));
            }
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn min_fade_tick(&self) -> Duration {
        Duration::from_millis(self.min_fade_tick_ms.max(1))
    }
}
