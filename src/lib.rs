//! r-crossfader library core functionality

pub mod audio;
pub mod config;
pub mod engine;
pub mod media;
pub mod ui;

pub use audio::{EngineError, HandleFactory, PlaybackHandle, SimulatedBackend};
pub use config::EngineSettings;
pub use engine::{Engine, EngineEvent, EngineHandle, EngineState};
pub use media::{MediaType, Track};

/// Initialize the configuration directory
pub fn init_config_dir() -> std::io::Result<()> {
    let default_path = config::EngineSettings::default_path();
    if let Some(config_dir) = default_path.parent() {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)?;
        }
    }
    Ok(())
}
