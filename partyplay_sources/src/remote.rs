use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{format_err, Result};
use api_models::{player::Song, settings::RemoteBackendSettings};
use log::{debug, info};
use url::Url;

use crate::{MediaBackend, StreamLocation};

struct Connection {
    agent: ureq::Agent,
    base_url: Url,
}

/// A JSON song catalog reachable over HTTP.
///
/// `GET {base_url}/search?q=..&limit=..` answers with a list of songs and
/// `{base_url}/stream/{id}` serves (or redirects to) the audio bytes.
pub struct RemoteCatalogBackend {
    settings: RemoteBackendSettings,
    connection: RwLock<Option<Connection>>,
}

impl RemoteCatalogBackend {
    #[must_use]
    pub fn new(settings: &RemoteBackendSettings) -> Self {
        Self {
            settings: settings.clone(),
            connection: RwLock::new(None),
        }
    }

    fn with_connection<T>(&self, job: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let connection = self.connection.read().unwrap_or_else(PoisonError::into_inner);
        let connection = connection
            .as_ref()
            .ok_or_else(|| format_err!("Backend {} is not initialized", self.settings.name))?;
        job(connection)
    }

    fn endpoint(base_url: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base_url.clone();
        url.path_segments_mut()
            .map_err(|()| format_err!("Base url {base_url} cannot have a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl MediaBackend for RemoteCatalogBackend {
    fn init(&self) -> Result<()> {
        let base_url = Url::parse(&self.settings.base_url)?;
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        info!("Connected remote catalog {} at {base_url}", self.settings.name);
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = Some(Connection { agent, base_url });
        Ok(())
    }

    fn search(&self, terms: &str, limit: usize) -> Result<Vec<Song>> {
        self.with_connection(|connection| {
            let url = Self::endpoint(&connection.base_url, &["search"])?;
            let mut request = connection
                .agent
                .request_url("GET", &url)
                .query("q", terms)
                .query("limit", &limit.to_string())
                .set("accept", "application/json");
            if let Some(key) = &self.settings.api_key {
                request = request.set("authorization", &format!("Bearer {key}"));
            }
            debug!("Searching {url} for [{terms}]");
            let body = request.call()?.into_string()?;
            let mut songs: Vec<Song> = serde_json::from_str(&body)?;
            songs.truncate(limit);
            Ok(songs)
        })
    }

    fn stream_location(&self, song_id: &str) -> Result<StreamLocation> {
        self.with_connection(|connection| {
            let mut url = Self::endpoint(&connection.base_url, &["stream", song_id])?;
            if let Some(key) = &self.settings.api_key {
                url.query_pairs_mut().append_pair("key", key);
            }
            Ok(StreamLocation::Url(url.to_string()))
        })
    }
}
