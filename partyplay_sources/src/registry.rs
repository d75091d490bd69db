use std::collections::BTreeMap;
use std::sync::Arc;

use api_models::{player::Song, settings::BackendSettings};
use futures::future::join_all;
use log::{error, info, warn};

use crate::{local::LocalLibraryBackend, remote::RemoteCatalogBackend, MediaBackend};

/// Songs found across all backends plus `(backend, error)` for every backend that failed.
#[derive(Debug, Default)]
pub struct SearchResults {
    pub songs: Vec<Song>,
    pub errors: Vec<(String, String)>,
}

/// Name to backend mapping, filled once at start-up.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn MediaBackend>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and initializes every configured backend. Backends failing to initialize are left out.
    #[must_use]
    pub fn from_settings(settings: &[BackendSettings]) -> Self {
        let mut registry = Self::new();
        for backend_settings in settings {
            let name = backend_settings.name();
            if registry.get(name).is_some() {
                warn!("Duplicate backend name {name}, ignoring");
                continue;
            }
            let backend: Arc<dyn MediaBackend> = match backend_settings {
                BackendSettings::Local(s) => Arc::new(LocalLibraryBackend::new(s)),
                BackendSettings::Remote(s) => Arc::new(RemoteCatalogBackend::new(s)),
            };
            match backend.init() {
                Ok(()) => {
                    info!("Backend {name} initialized");
                    registry.register(name, backend);
                }
                Err(e) => error!("Backend {name} failed to initialize: {e:#}"),
            }
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn MediaBackend>) {
        self.backends.insert(name.into(), backend);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// The backend name when exactly one backend is registered.
    #[must_use]
    pub fn sole_backend(&self) -> Option<&str> {
        if self.backends.len() == 1 {
            self.names().next()
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Queries all backends concurrently. Every returned song carries the name of the backend that found it.
    pub async fn search(&self, terms: &str, limit: usize) -> SearchResults {
        let searches = self.backends.iter().map(|(name, backend)| {
            let backend = Arc::clone(backend);
            let terms = terms.to_owned();
            let name = name.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || backend.search(&terms, limit)).await;
                (name, result)
            }
        });

        let mut results = SearchResults::default();
        for (name, result) in join_all(searches).await {
            match result {
                Ok(Ok(songs)) => results.songs.extend(songs.into_iter().map(|mut song| {
                    song.backend.clone_from(&name);
                    song
                })),
                Ok(Err(e)) => {
                    warn!("Search on backend {name} failed: {e:#}");
                    results.errors.push((name, e.to_string()));
                }
                Err(e) => {
                    error!("Search task for backend {name} panicked: {e}");
                    results.errors.push((name, e.to_string()));
                }
            }
        }
        results
    }
}
