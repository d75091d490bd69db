use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use api_models::settings::Settings;
use sled::{Db, IVec};

const SETTINGS_KEY: &str = "settings";
const DEFAULT_DB_PATH: &str = "configuration.db";

pub type ArcConfiguration = Arc<Configuration>;

pub struct Configuration {
    db: Db,
    settings: RwLock<Settings>,
}

impl Configuration {
    /// Opens the configuration db named by `PARTYPLAY_CONFIG_DB`, or `configuration.db`.
    pub fn new() -> Result<Self> {
        let path = std::env::var("PARTYPLAY_CONFIG_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self::open(path)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let settings = if let Some(data) = db.get(SETTINGS_KEY)? {
            match serde_json::from_slice::<Settings>(&data) {
                Ok(settings) => settings,
                Err(e) => {
                    log::error!("Failed to deserialize settings from DB: {e}. Falling back to default.");
                    Settings::default()
                }
            }
        } else {
            let s = Settings::default();
            db.insert(SETTINGS_KEY, IVec::from(serde_json::to_vec(&s)?))?;
            s
        };
        Ok(Self {
            db,
            settings: RwLock::new(settings),
        })
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.db.insert(SETTINGS_KEY, serde_json::to_vec(settings)?)?;
        self.db.flush()?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use api_models::settings::{BackendSettings, RemoteBackendSettings};

    use super::Configuration;

    #[test]
    fn should_write_defaults_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.db");
        {
            let config = Configuration::open(&path).unwrap();
            assert_eq!(config.get_settings().cache_settings.retry_delay_ms, 5000);
        }
        // let sled release the file lock
        std::thread::sleep(std::time::Duration::from_millis(100));
        let reopened = Configuration::open(&path).unwrap();
        assert_eq!(reopened.get_settings(), api_models::settings::Settings::default());
    }

    #[test]
    fn should_persist_saved_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.db");
        {
            let config = Configuration::open(&path).unwrap();
            let mut settings = config.get_settings();
            settings.http_settings.port = 9090;
            settings.backends.push(BackendSettings::Remote(RemoteBackendSettings {
                name: "catalog".to_string(),
                base_url: "http://localhost:9000".to_string(),
                api_key: None,
                timeout_ms: 1000,
            }));
            config.save_settings(&settings).unwrap();
            assert_eq!(config.get_settings().http_settings.port, 9090);
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
        let reopened = Configuration::open(&path).unwrap();
        let settings = reopened.get_settings();
        assert_eq!(settings.http_settings.port, 9090);
        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[1].name(), "catalog");
    }
}
