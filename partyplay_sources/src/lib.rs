use std::path::PathBuf;

use anyhow::Result;
use api_models::player::Song;

pub mod local;
pub mod media_info;
pub mod registry;
pub mod remote;

pub use registry::{BackendRegistry, SearchResults};

/// Where the bytes of a song can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocation {
    Url(String),
    File(PathBuf),
}

/// A pluggable media source.
///
/// Methods block; callers on the async runtime run them through `spawn_blocking`.
#[cfg_attr(test, mockall::automock)]
pub trait MediaBackend: Send + Sync {
    /// (Re)establishes whatever connection or index the backend needs.
    fn init(&self) -> Result<()>;

    fn search(&self, terms: &str, limit: usize) -> Result<Vec<Song>>;

    fn stream_location(&self, song_id: &str) -> Result<StreamLocation>;
}
