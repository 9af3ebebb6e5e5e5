//! The engine's select loop.

use super::{command_handler, Engine, EngineCommand, ENGINE_LOG_TARGET};
use tracing::{info, trace};

/// Runs the engine's event loop. Every slot mutation happens here.
pub(super) async fn run_engine_loop(engine: &mut Engine) {
    info!(target: ENGINE_LOG_TARGET, "Engine run loop started.");
    engine.publish_snapshot();

    loop {
        tokio::select! {
            biased; // Commands first so stop and load preempt pending ticks

            // --- Command Processing ---
            command = engine.command_rx.recv() => {
                match command {
                    Some(EngineCommand::Shutdown) => {
                        info!(target: ENGINE_LOG_TARGET, "Shutdown command received. Exiting run loop.");
                        break;
                    }
                    Some(command) => {
                        trace!(target: ENGINE_LOG_TARGET, "Received command: {:?}", command);
                        command_handler::dispatch(engine, command);
                    }
                    None => {
                        info!(target: ENGINE_LOG_TARGET, "All engine handles dropped. Exiting run loop.");
                        break;
                    }
                }
            }

            // --- Handle Opens ---
            Some(completed) = engine.completed_rx.recv() => {
                command_handler::handle_open_completed(engine, completed);
            }

            // --- Handle Faults ---
            Some(fault) = engine.fault_rx.recv() => {
                command_handler::handle_fault(engine, fault);
            }

            // --- Crossfade Steps ---
            _ = engine.fade_ticker.tick(), if engine.fade_ticker.is_armed() => {
                command_handler::handle_fade_tick(engine);
            }

            // --- Progress Tracking ---
            _ = engine.progress_ticker.tick(), if engine.progress_ticker.is_armed() => {
                command_handler::handle_progress_tick(engine);
            }
        }
    }

    info!(target: ENGINE_LOG_TARGET, "Engine run loop finished. Releasing slots.");
    command_handler::cleanup(engine);
    info!(target: ENGINE_LOG_TARGET, "Engine task cleanup complete.");
}
