use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use api_models::settings::CacheSettings;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use partyplay_sources::{BackendRegistry, MediaBackend, StreamLocation};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("unknown backend {0}")]
    UnknownBackend(String),
    #[error("invalid song id {0:?}")]
    InvalidSongId(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("unexpected http status {0}")]
    BadStatus(u16),
    #[error("more than {0} redirects")]
    TooManyRedirects(u32),
    #[error("gave up after {0} connection retries")]
    RetriesExhausted(u32),
    #[error("io error: {0}")]
    Io(String),
    #[error("download aborted")]
    Aborted,
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Outcome of a single download attempt.
enum Failure {
    /// Connection level problem, worth retrying with a fresh stream location.
    Transport(String),
    Fatal(CacheError),
}

impl From<CacheError> for Failure {
    fn from(e: CacheError) -> Self {
        Self::Fatal(e)
    }
}

/// Song ids are opaque; everything but `[A-Za-z0-9_-]` is escaped in artifact names, dots included,
/// so a name can neither climb out of its backend directory nor collide with a `.part` file.
const ARTIFACT_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

type DownloadKey = (String, String);
type Download = Shared<BoxFuture<'static, Result<PathBuf, CacheError>>>;

/// Materializes songs as files under the cache directory.
///
/// A song is cached at `{cache_dir}/{backend}/{escaped song_id}`; the presence of that file is the only hit signal.
/// Concurrent requests for the same song share one download.
#[derive(Clone)]
pub struct CachePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    registry: BackendRegistry,
    settings: CacheSettings,
    agent: ureq::Agent,
    downloads: Mutex<HashMap<DownloadKey, Download>>,
}

impl CachePipeline {
    #[must_use]
    pub fn new(registry: BackendRegistry, settings: CacheSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout_connect(Duration::from_millis(settings.connect_timeout_ms))
            .timeout_read(Duration::from_millis(settings.read_timeout_ms))
            .build();
        Self {
            inner: Arc::new(Inner {
                registry,
                settings,
                agent,
                downloads: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        Path::new(&self.inner.settings.cache_dir)
    }

    #[must_use]
    pub fn artifact_path(&self, backend: &str, song_id: &str) -> PathBuf {
        self.cache_dir().join(backend).join(artifact_name(song_id))
    }

    /// Returns the path of the cached song, downloading it first on a miss.
    pub async fn ensure_cached(&self, backend: &str, song_id: &str) -> Result<PathBuf, CacheError> {
        if !is_safe_segment(backend) {
            return Err(CacheError::UnknownBackend(backend.to_owned()));
        }
        if song_id.is_empty() {
            return Err(CacheError::InvalidSongId(song_id.to_owned()));
        }
        let media_backend = self
            .inner
            .registry
            .get(backend)
            .ok_or_else(|| CacheError::UnknownBackend(backend.to_owned()))?;

        let artifact = self.artifact_path(backend, song_id);
        if artifact.is_file() {
            debug!("Cache hit for {backend}/{song_id}");
            return Ok(artifact);
        }

        let download = {
            let key = (backend.to_owned(), song_id.to_owned());
            let mut downloads = self.inner.downloads.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(download) = downloads.get(&key) {
                debug!("Joining download of {backend}/{song_id}");
                download.clone()
            } else if artifact.is_file() {
                // finished between the first check and taking the lock
                return Ok(artifact);
            } else {
                let download = self.start_download(key.clone(), media_backend, artifact);
                downloads.insert(key, download.clone());
                download
            }
        };
        download.await
    }

    /// Must be called with the downloads lock held so the spawned task cannot deregister before it is inserted.
    fn start_download(&self, key: DownloadKey, backend: Arc<dyn MediaBackend>, artifact: PathBuf) -> Download {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let worker = Arc::clone(&inner);
            let (backend_name, song_id) = key.clone();
            let result =
                tokio::task::spawn_blocking(move || worker.fetch(&*backend, &backend_name, &song_id, &artifact))
                    .await
                    .unwrap_or_else(|e| {
                        error!("Download task failed: {e}");
                        Err(CacheError::Aborted)
                    });
            inner
                .downloads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            result
        });
        async move { task.await.unwrap_or(Err(CacheError::Aborted)) }
            .boxed()
            .shared()
    }
}

impl Inner {
    fn fetch(
        &self,
        backend: &dyn MediaBackend,
        backend_name: &str,
        song_id: &str,
        artifact: &Path,
    ) -> Result<PathBuf, CacheError> {
        let start_time = Instant::now();
        let dir = artifact
            .parent()
            .ok_or_else(|| CacheError::Io(format!("{} has no parent", artifact.display())))?;
        fs::create_dir_all(dir)?;
        let partial = artifact.with_extension("part");
        let retry_delay = Duration::from_millis(self.settings.retry_delay_ms);
        let mut retries = 0;

        loop {
            let attempt = backend
                .stream_location(song_id)
                .map_err(|e| Failure::Fatal(CacheError::Backend(format!("{e:#}"))))
                .and_then(|location| match location {
                    StreamLocation::Url(url) => self.fetch_url(&url, &partial),
                    StreamLocation::File(path) => copy_file(&path, &partial).map_err(Failure::from),
                });
            match attempt {
                Ok(()) => {
                    fs::rename(&partial, artifact)?;
                    info!(
                        "Cached {backend_name}/{song_id} in {:?} after {retries} retries",
                        start_time.elapsed()
                    );
                    return Ok(artifact.to_path_buf());
                }
                Err(Failure::Fatal(e)) => {
                    discard(&partial);
                    warn!("Download of {backend_name}/{song_id} failed: {e}");
                    return Err(e);
                }
                Err(Failure::Transport(reason)) => {
                    discard(&partial);
                    if self.settings.max_connection_retries.is_some_and(|max| retries >= max) {
                        error!("Download of {backend_name}/{song_id} failed: {reason}, giving up");
                        return Err(CacheError::RetriesExhausted(retries));
                    }
                    retries += 1;
                    warn!(
                        "Download of {backend_name}/{song_id} interrupted: {reason}, retry {retries} in {retry_delay:?}"
                    );
                    std::thread::sleep(retry_delay);
                    if let Err(e) = backend.init() {
                        warn!("Re-initializing backend {backend_name} failed: {e:#}");
                    }
                }
            }
        }
    }

    fn fetch_url(&self, start_url: &str, partial: &Path) -> Result<(), Failure> {
        let mut url =
            Url::parse(start_url).map_err(|e| CacheError::Backend(format!("invalid stream url {start_url}: {e}")))?;
        let mut hops = 0;
        loop {
            debug!("GET {url}");
            let response = match self.agent.request_url("GET", &url).call() {
                Ok(response) => response,
                Err(ureq::Error::Status(code, _)) => return Err(CacheError::BadStatus(code).into()),
                Err(ureq::Error::Transport(transport)) => return Err(Failure::Transport(transport.to_string())),
            };
            let status = response.status();
            if (300..400).contains(&status) {
                discard(partial);
                let location = response.header("location").ok_or(CacheError::BadStatus(status))?;
                if hops >= self.settings.max_redirects {
                    return Err(CacheError::TooManyRedirects(self.settings.max_redirects).into());
                }
                hops += 1;
                url = url
                    .join(location)
                    .map_err(|e| CacheError::Backend(format!("invalid redirect {location}: {e}")))?;
                debug!("Redirected to {url}");
                continue;
            }
            if status != 200 {
                return Err(CacheError::BadStatus(status).into());
            }
            let mut file = File::create(partial).map_err(CacheError::from)?;
            io::copy(&mut response.into_reader(), &mut file).map_err(|e| Failure::Transport(e.to_string()))?;
            file.sync_all().map_err(CacheError::from)?;
            return Ok(());
        }
    }
}

fn copy_file(source: &Path, partial: &Path) -> Result<(), CacheError> {
    fs::copy(source, partial)?;
    File::open(partial)?.sync_all()?;
    Ok(())
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", partial.display());
        }
    }
}

fn artifact_name(song_id: &str) -> String {
    utf8_percent_encode(song_id, ARTIFACT_NAME).to_string()
}

/// `[A-Za-z0-9._-]+`, not starting with a dot.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
