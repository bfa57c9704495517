use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::memory::MemoryStore;
use crate::store::postgrest::PostgrestClient;
use crate::store::TableStore;

pub const STORE_URL_ENV: &str = "VERSEGEN_STORE_URL";
pub const API_KEY_ENV: &str = "VERSEGEN_API_KEY";

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the PostgREST endpoint.
    pub store_url: Option<String>,
    pub api_key: Option<String>,
    /// Offline JSON data used instead of the remote store when set.
    pub fixture: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    /// Environment first, then the config file.
    pub fn store_url(&self) -> Option<String> {
        std::env::var(STORE_URL_ENV)
            .ok()
            .or_else(|| self.store_url.clone())
    }

    /// Environment first, then the config file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
    }

    /// The fixture wins over the remote store when both are configured.
    pub fn open_store(&self) -> Result<Arc<dyn TableStore>> {
        if let Some(fixture) = &self.fixture {
            let store = MemoryStore::from_path(fixture)
                .map_err(|e| anyhow!("Failed to load fixture {:?}: {}", fixture, e))?;
            return Ok(Arc::new(store));
        }

        let url = self.store_url().ok_or_else(|| {
            anyhow!(
                "No verse store configured. Set {} (and {}) or a fixture path",
                STORE_URL_ENV,
                API_KEY_ENV
            )
        })?;
        let key = self.api_key().unwrap_or_default();
        Ok(Arc::new(PostgrestClient::new(&url, &key)))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("versegen").join("config.json"))
    }
}
