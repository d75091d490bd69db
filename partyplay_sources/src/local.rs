use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use anyhow::{format_err, Result};
use api_models::{player::Song, settings::LocalBackendSettings};
use log::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{media_info::read_media_info, MediaBackend, StreamLocation};

struct IndexedSong {
    path: PathBuf,
    song: Song,
}

/// Serves songs from a directory tree on the local filesystem.
pub struct LocalLibraryBackend {
    settings: LocalBackendSettings,
    index: RwLock<HashMap<String, IndexedSong>>,
}

impl LocalLibraryBackend {
    #[must_use]
    pub fn new(settings: &LocalBackendSettings) -> Self {
        Self {
            settings: settings.clone(),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Stable, filesystem safe id derived from the path relative to the music directory.
    #[must_use]
    pub fn song_id(relative_path: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, relative_path.as_bytes())
            .simple()
            .to_string()
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ex| ex.to_str())
            .is_some_and(|ex| self.settings.supported_extensions.contains(&ex.to_lowercase()))
    }

    fn scan(&self) -> Result<HashMap<String, IndexedSong>> {
        let music_dir = Path::new(&self.settings.music_directory);
        if !music_dir.is_dir() {
            return Err(format_err!("Music directory {} does not exist", music_dir.display()));
        }
        let mut index = HashMap::new();
        for entry in WalkDir::new(music_dir)
            .follow_links(self.settings.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|de| de.file_type().is_file())
            .filter(|de| self.is_supported(de.path()))
        {
            let path = entry.path();
            let relative = path.strip_prefix(music_dir).unwrap_or(path).to_string_lossy().to_string();
            match read_song(path, &relative) {
                Ok(song) => {
                    debug!("Indexed {relative} as {}", song.id);
                    index.insert(
                        song.id.clone(),
                        IndexedSong {
                            path: path.to_path_buf(),
                            song,
                        },
                    );
                }
                Err(e) => warn!("Skipping {relative}: {e:#}"),
            }
        }
        Ok(index)
    }
}

fn read_song(path: &Path, relative: &str) -> Result<Song> {
    let media_info = read_media_info(path)?;
    let duration = media_info
        .duration
        .filter(|d| !d.is_zero())
        .ok_or_else(|| format_err!("unknown duration"))?;
    let title = media_info.title.unwrap_or_else(|| {
        path.file_stem()
            .map_or_else(|| relative.to_owned(), |stem| stem.to_string_lossy().to_string())
    });
    Ok(Song {
        id: LocalLibraryBackend::song_id(relative),
        title,
        artist: media_info.artist,
        album: media_info.album,
        duration: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        tags: HashMap::from([("path".to_string(), relative.to_owned())]),
        ..Default::default()
    })
}

impl MediaBackend for LocalLibraryBackend {
    fn init(&self) -> Result<()> {
        let start_time = Instant::now();
        let index = self.scan()?;
        info!(
            "Local library {} indexed {} songs in {:?}",
            self.settings.music_directory,
            index.len(),
            start_time.elapsed()
        );
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        Ok(())
    }

    fn search(&self, terms: &str, limit: usize) -> Result<Vec<Song>> {
        let terms: Vec<String> = terms.split_whitespace().map(str::to_lowercase).collect();
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut songs: Vec<Song> = index
            .values()
            .filter(|indexed| {
                let text = indexed.song.all_text().to_lowercase();
                terms.iter().all(|term| text.contains(term.as_str()))
            })
            .map(|indexed| indexed.song.clone())
            .collect();
        songs.sort_by(|a, b| a.artist.cmp(&b.artist).then_with(|| a.title.cmp(&b.title)));
        songs.truncate(limit);
        Ok(songs)
    }

    fn stream_location(&self, song_id: &str) -> Result<StreamLocation> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(song_id)
            .map(|indexed| StreamLocation::File(indexed.path.clone()))
            .ok_or_else(|| format_err!("Song {song_id} not found in local library"))
    }
}
