use r_crossfader::config::EngineSettings;
use r_crossfader::engine::{Engine, EngineEvent, EngineState};
use r_crossfader::init_config_dir;
use r_crossfader::media::Track;
use r_crossfader::ui::Cli;
use r_crossfader::{EngineError, SimulatedBackend};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "r_crossfader=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn position_of(tracks: &[Track], id: &str) -> Option<usize> {
    tracks.iter().position(|t| t.id == id)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments and initialize CLI
    let cli = Cli::new();
    let args = &cli.args;
    init_tracing(args.json_logs);

    // Load configuration from file or fall back to defaults
    let config_path = match &args.config {
        Some(path) => Path::new(path).to_path_buf(),
        None => {
            init_config_dir()?;
            EngineSettings::default_path()
        }
    };
    let settings = EngineSettings::load(&config_path)?;
    settings.validate()?;
    info!(path = %config_path.display(), "Settings loaded.");

    let tracks = cli.load_playlist()?;

    let backend = SimulatedBackend::new(args.track_ms);
    for uri in &args.unreachable {
        backend.mark_unreachable(uri.clone());
    }

    let (engine, task) = Engine::spawn(settings, Arc::new(backend));
    let mut events = engine.subscribe_events();
    let preferences = engine.preferences().await?;

    if let Err(e) = engine.load_and_play(tracks[0].clone(), tracks.get(1).cloned()).await {
        cli.display_error(&e);
    }

    let mut played = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping playback.");
                break;
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener fell behind.");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                cli.display_event(&event);

                match event {
                    EngineEvent::TrackStart(track) => {
                        played += 1;
                        // The second track is already primed by load_and_play.
                        if let Some(index) = position_of(&tracks, &track.id).filter(|i| *i > 0) {
                            if let Some(next) = tracks.get(index + 1) {
                                if let Err(e) = engine.preload(next.clone()).await {
                                    cli.display_error(&e);
                                }
                            }
                        }
                    }
                    EngineEvent::TrackEnd(track) => {
                        let next = position_of(&tracks, &track.id).and_then(|i| tracks.get(i + 1));
                        let Some(next) = next else {
                            break;
                        };
                        // The engine only advances on its own for a gapless cut into `next`.
                        let gapless_cut = preferences
                            .get(&next.media_type)
                            .map_or(false, |p| p.crossfade_ms == 0 && p.gapless);
                        if !gapless_cut {
                            match engine.crossfade_to_next(next.clone()).await {
                                Ok(()) | Err(EngineError::TransitionInProgress) => {}
                                Err(e) => cli.display_error(&e),
                            }
                        }
                    }
                    EngineEvent::StateChange(EngineState::Error) => break,
                    _ => {}
                }
            }
        }
    }

    engine.stop().await?;
    let state = engine.wait_for_state(|s| s == EngineState::Stopped).await?;
    cli.display_summary(state, played, tracks.len());
    engine.shutdown().await?;
    task.await?;
    Ok(())
}
