//! Media model: tracks, source resolution and per-type preferences

pub mod preferences;
pub mod resolver;
mod track;

pub use preferences::*;
pub use resolver::*;
pub use track::*;
