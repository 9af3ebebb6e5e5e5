//! Playback handle abstraction and backends

pub mod error;
pub mod handle;
pub mod simulated;

pub use error::EngineError;
pub use handle::*;
pub use simulated::{SimulatedBackend, SimulatedHandle};
