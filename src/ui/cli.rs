//! Command-line interface implementation

use clap::Parser;
use std::error::Error;
use std::fs;
use std::path::Path;

use crate::engine::{EngineEvent, EngineState};
use crate::media::Track;

/// Command-line arguments for r-crossfader
#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-slot crossfading playback engine demo", long_about = None)]
pub struct Args {
    /// JSON file holding an array of tracks to play in order
    #[arg(value_name = "PLAYLIST")]
    pub playlist: String,

    /// Config file path
    #[arg(short, long, env = "CROSSFADER_CONFIG")]
    pub config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "CROSSFADER_JSON_LOGS")]
    pub json_logs: bool,

    /// Duration of every simulated source, in milliseconds
    #[arg(short = 'd', long, default_value_t = 30_000)]
    pub track_ms: u64,

    /// URIs the simulated backend refuses to open (repeatable)
    #[arg(short = 'u', long = "unreachable", value_name = "URI")]
    pub unreachable: Vec<String>,
}

/// CLI user interface for the demo player
pub struct Cli {
    pub args: Args,
}

impl Cli {
    /// Create a new CLI instance
    pub fn new() -> Self {
        Cli { args: Args::parse() }
    }

    /// Reads the playlist named on the command line.
    pub fn load_playlist(&self) -> Result<Vec<Track>, Box<dyn Error>> {
        read_playlist(Path::new(&self.args.playlist))
    }

    /// Display one engine event
    pub fn display_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TrackStart(track) => println!("\nNow playing: {} [{}]", track.id, track.media_type),
            EngineEvent::TrackEnd(track) => println!("Finished: {}", track.id),
            EngineEvent::StateChange(state) => println!("State: {}", state),
            EngineEvent::Error(e) => eprintln!("Engine error: {}", e),
            EngineEvent::Progress(_) => {}
        }
    }

    /// Display the final state after the playlist is done
    pub fn display_summary(&self, state: EngineState, played: usize, total: usize) {
        println!("\nPlayed {} of {} tracks, engine {}.", played, total, state);
    }

    /// Display error messages
    pub fn display_error(&self, error: &dyn Error) {
        eprintln!("Error: {}", error);
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a JSON array of tracks. An empty list is an error.
pub fn read_playlist(path: &Path) -> Result<Vec<Track>, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let tracks: Vec<Track> = serde_json::from_str(&contents)?;
    if tracks.is_empty() {
        return Err(format!("Playlist {} contains no tracks", path.display()).into());
    }
    Ok(tracks)
}
