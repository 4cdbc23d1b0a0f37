//! Application configuration management.
//!
//! This module handles loading the client configuration: the API
//! base URL, where session tokens are stored, and an optional request
//! timeout.
//!
//! Configuration is stored at `~/.config/bookswap/config.json`. The
//! `BOOKSWAP_API_URL` and `BOOKSWAP_STORAGE` environment variables override
//! the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::api::ApiClient;
use crate::auth::{FileStorage, KeyringStorage, MemoryStorage, SessionStore, TokenStorage};

/// Application name used for config/data directory paths
const APP_NAME: &str = "bookswap";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when nothing is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

pub const API_URL_ENV: &str = "BOOKSWAP_API_URL";
pub const STORAGE_ENV: &str = "BOOKSWAP_STORAGE";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Where the session's tokens live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!(
                "Unknown storage backend '{}' (expected file, keyring or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// No timeout unless set
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            storage: StorageBackend::default(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load from the user config file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production). Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(storage) = lookup(STORAGE_ENV).filter(|v| !v.trim().is_empty()) {
            self.storage = storage
                .parse()
                .with_context(|| format!("Invalid {}", STORAGE_ENV))?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the token file for the `file` backend
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// The process-wide session store for the configured backend
    pub fn session_store(&self) -> Result<SessionStore> {
        let storage: Arc<dyn TokenStorage> = match self.storage {
            StorageBackend::File => Arc::new(FileStorage::new(self.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(SessionStore::new(storage))
    }

    /// API client bound to `session`
    pub fn api_client(&self, session: SessionStore) -> Result<ApiClient> {
        ApiClient::with_timeout(&self.api_url, session, self.request_timeout())
            .context("Failed to create API client")
    }
}
