//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use waypost_core::TrackerConfig;

/// Environment variable overriding `api.url`.
pub const API_URL_ENV: &str = "WAYPOST_API_URL";

/// Environment variable overriding `api.token`.
pub const TOKEN_ENV: &str = "WAYPOST_TOKEN";

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the ingestion API
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout: default_timeout(),
        }
    }
}

/// Local persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the key/value store file (defaults to the platform data directory)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("waypost")
            .join("config.toml")
    }

    /// Load config from `path` (or the default path), then apply environment
    /// overrides.
    ///
    /// A missing file at the default path yields the defaults; a missing file
    /// that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if explicit {
            bail!("Config file not found: {}", path.display());
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
            .tracker
            .validate()
            .context("Invalid [tracker] configuration")?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Override file values with non-empty environment values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api.url = Some(url);
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.api.token = Some(token);
        }
    }

    /// Base URL of the API, or an error explaining how to set it.
    pub fn api_url(&self) -> Result<&str> {
        self.api.url.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No API URL configured. Set [api] url in {} or the {} environment variable.",
                Self::default_path().display(),
                API_URL_ENV
            )
        })
    }

    /// Save config to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
