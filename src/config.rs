use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";

const DEFAULT_BASE_URL: &str = "https://api.jsonstore.example/v1";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_PUSH_DEBOUNCE_MS: u64 = 2000;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Remote document store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API credential for the bin service (empty = sync disabled)
    pub api_key: String,
    /// Optional known document id, used to seed the cached pointer
    pub document_id: String,
    /// Base URL of the document store API
    pub base_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            document_id: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl RemoteConfig {
    /// Sync runs only when a credential is present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Sync timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between remote polls
    pub poll_interval_secs: u64,
    /// Milliseconds a local edit waits before the upload fires
    pub push_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            push_debounce_ms: DEFAULT_PUSH_DEBOUNCE_MS,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }
}

/// Local storage settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory (empty = platform default)
    pub data_dir: Option<String>,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("cadence");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path).context("Failed to read config file")?;

            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;

            Ok(config)
        } else {
            // Create default config and save it
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents).context("Failed to write config file")?;

        Ok(())
    }
}
