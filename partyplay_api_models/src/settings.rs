use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub http_settings: HttpSettings,
    #[serde(default)]
    pub cache_settings: CacheSettings,
    #[serde(default)]
    pub playback_settings: PlaybackSettings,
    #[serde(default)]
    pub search_settings: SearchSettings,
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub port: u16,
    pub fallback_port: u16,
    /// Directory with a web front-end served at `/`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CacheSettings {
    pub cache_dir: String,
    #[validate(range(min = 1))]
    pub retry_delay_ms: u64,
    /// `None` retries dropped connections forever.
    pub max_connection_retries: Option<u32>,
    pub max_redirects: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Added to the probed song duration before the song-end timer fires.
    pub end_padding_ms: u64,
    pub prefetch_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub result_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendSettings {
    Local(LocalBackendSettings),
    Remote(RemoteBackendSettings),
}

impl BackendSettings {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local(s) => &s.name,
            Self::Remote(s) => &s.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LocalBackendSettings {
    #[validate(length(min = 1))]
    pub name: String,
    pub music_directory: String,
    pub follow_links: bool,
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RemoteBackendSettings {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(url)]
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            fallback_port: 8000,
            static_dir: None,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_dir: "song_cache".to_string(),
            retry_delay_ms: 5000,
            max_connection_retries: Some(12),
            max_redirects: 10,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            end_padding_ms: 1000,
            prefetch_enabled: true,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { result_count: 20 }
    }
}

impl Default for LocalBackendSettings {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            music_directory: "/music".into(),
            follow_links: true,
            supported_extensions: vec!["flac", "wav", "mp3", "m4a", "aac", "aiff", "alac", "ogg", "mp4"]
                .into_iter()
                .map(std::borrow::ToOwned::to_owned)
                .collect(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_settings: HttpSettings::default(),
            cache_settings: CacheSettings::default(),
            playback_settings: PlaybackSettings::default(),
            search_settings: SearchSettings::default(),
            backends: vec![BackendSettings::Local(LocalBackendSettings::default())],
        }
    }
}
