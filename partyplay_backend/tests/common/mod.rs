#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{format_err, Result};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use api_models::common::UserCommand;
use api_models::player::Song;
use api_models::state::StateChangeEvent;
use partyplay::server_warp::ServerContext;
use partyplay_config::Configuration;
use partyplay_playback::{CachePipeline, PlaybackScheduler};
use partyplay_sources::{BackendRegistry, MediaBackend, StreamLocation};

/// Finds one song per search, titled after the search terms, and streams every song from the same file.
pub struct FixtureBackend {
    file: PathBuf,
    failing: bool,
}

impl MediaBackend for FixtureBackend {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn search(&self, terms: &str, _limit: usize) -> Result<Vec<Song>> {
        if self.failing {
            return Err(format_err!("catalog offline"));
        }
        Ok(vec![Song {
            id: "found".to_string(),
            title: terms.to_string(),
            duration: 1000,
            ..Default::default()
        }])
    }

    fn stream_location(&self, _song_id: &str) -> Result<StreamLocation> {
        Ok(StreamLocation::File(self.file.clone()))
    }
}

pub struct Fixture {
    pub context: ServerContext,
    pub commands_tx: mpsc::Sender<UserCommand>,
    pub commands_rx: mpsc::Receiver<UserCommand>,
    pub changes_tx: broadcast::Sender<StateChangeEvent>,
    _dir: TempDir,
}

/// Backends are given as `(name, failing)`.
pub fn setup(backends: &[(&str, bool)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    // not decodable audio, playback falls back to the declared duration
    let file = dir.path().join("song.bin");
    std::fs::write(&file, b"not really audio").unwrap();

    let config = Configuration::open(dir.path().join("config.db")).unwrap();
    let mut settings = config.get_settings();
    settings.cache_settings.cache_dir = dir.path().join("cache").to_string_lossy().to_string();
    config.save_settings(&settings).unwrap();

    let mut registry = BackendRegistry::new();
    for (name, failing) in backends {
        registry.register(
            *name,
            Arc::new(FixtureBackend {
                file: file.clone(),
                failing: *failing,
            }),
        );
    }
    let cache = CachePipeline::new(registry.clone(), settings.cache_settings.clone());
    let (changes_tx, _) = broadcast::channel(64);
    let scheduler = PlaybackScheduler::spawn(cache, settings.playback_settings, changes_tx.clone());
    let (commands_tx, commands_rx) = mpsc::channel(16);
    Fixture {
        context: ServerContext {
            scheduler,
            registry,
            config: Arc::new(config),
        },
        commands_tx,
        commands_rx,
        changes_tx,
        _dir: dir,
    }
}

pub fn create_song(id: &str) -> Song {
    Song {
        id: id.to_string(),
        title: format!("Song {id}"),
        duration: 60_000,
        backend: "fixture".to_string(),
        ..Default::default()
    }
}
