#[macro_use]
extern crate log;

use std::sync::Arc;

use anyhow::Result;
use env_logger::Env;
use tokio::signal::unix::SignalKind;
use tokio::sync::{broadcast, mpsc};
use tokio::{select, spawn};

use partyplay::command_handler;
use partyplay::server_warp::{self, ServerContext};
use partyplay_config::Configuration;
use partyplay_playback::{CachePipeline, PlaybackScheduler};
use partyplay_sources::BackendRegistry;

#[allow(clippy::redundant_pub_crate)]
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let version = env!("CARGO_PKG_VERSION");
    info!("Starting partyplay {version}.");

    let config = Arc::new(Configuration::new()?);
    let settings = config.get_settings();
    info!("Configuration successfully loaded.");

    let mut term_signal = tokio::signal::unix::signal(SignalKind::terminate())?;

    let backend_settings = settings.backends.clone();
    let registry = tokio::task::spawn_blocking(move || BackendRegistry::from_settings(&backend_settings)).await?;
    if registry.is_empty() {
        warn!("No backend available, nothing can be queued.");
    } else {
        info!("Backends ready: {}", registry.names().collect::<Vec<_>>().join(", "));
    }

    let cache = CachePipeline::new(registry.clone(), settings.cache_settings.clone());
    info!("Caching songs in {}", cache.cache_dir().display());

    let (state_changes_tx, _) = broadcast::channel(64);
    let scheduler = PlaybackScheduler::spawn(cache, settings.playback_settings.clone(), state_changes_tx.clone());
    info!("Playback scheduler started.");

    let (user_commands_tx, user_commands_rx) = mpsc::channel(16);

    let context = ServerContext {
        scheduler: scheduler.clone(),
        registry: registry.clone(),
        config: config.clone(),
    };
    let (http_server_future, websocket_future) =
        server_warp::start(state_changes_tx.subscribe(), user_commands_tx, context)?;

    select! {
        () = command_handler::handle_user_commands(
                scheduler,
                registry,
                user_commands_rx,
                state_changes_tx.clone()) => {
            error!("Exit from command handler.");
        }

        _ = spawn(http_server_future) => {}

        _ = spawn(websocket_future) => {
            error!("Exit from websocket thread.");
        }

        _ = term_signal.recv() => {
            info!("Terminate signal received.");
        }

        _ = tokio::signal::ctrl_c() => {
            info!("CTRL-c signal received.");
        }
    };

    info!("partyplay shutdown completed.");
    Ok(())
}
