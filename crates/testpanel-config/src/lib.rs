use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_TESTPANEL_CONFIG: &str = "TESTPANEL_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./testpanel.toml";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
const DEFAULT_CREATE_CONCURRENCY: usize = 4;
const DEFAULT_TICK_INTERVAL_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelConfig {
    #[serde(default)]
    pub youtrack: YouTrackConfigToml,
    #[serde(default)]
    pub reconcile: ReconcileConfigToml,
    #[serde(default)]
    pub ui: UiConfigToml,
}

/// Connection settings for the tracker. The API token is deliberately not
/// part of the file; it comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct YouTrackConfigToml {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for YouTrackConfigToml {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfigToml {
    #[serde(default = "default_create_concurrency")]
    pub create_concurrency: usize,
}

impl Default for ReconcileConfigToml {
    fn default() -> Self {
        Self {
            create_concurrency: default_create_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiConfigToml {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for UiConfigToml {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_create_concurrency() -> usize {
    DEFAULT_CREATE_CONCURRENCY
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl PanelConfig {
    /// Loads the config from the `TESTPANEL_CONFIG` path (or the default
    /// location), writing a default file when none exists yet.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&config_path_from_env())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_or_create_config(path)
    }
}

pub fn config_path_from_env() -> PathBuf {
    std::env::var(ENV_TESTPANEL_CONFIG)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn persist_config(path: &Path, config: &PanelConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize TESTPANEL_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write TESTPANEL_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<PanelConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for TESTPANEL_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = PanelConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read TESTPANEL_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: PanelConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse TESTPANEL_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut PanelConfig) -> bool {
    let mut changed = false;

    let trimmed = config.youtrack.base_url.trim();
    if trimmed != config.youtrack.base_url {
        config.youtrack.base_url = trimmed.to_owned();
        changed = true;
    }
    if config.youtrack.request_timeout_secs == 0 {
        config.youtrack.request_timeout_secs = default_request_timeout_secs();
        changed = true;
    }
    if config.reconcile.create_concurrency == 0 {
        config.reconcile.create_concurrency = default_create_concurrency();
        changed = true;
    }
    if config.ui.tick_interval_ms == 0 {
        config.ui.tick_interval_ms = default_tick_interval_ms();
        changed = true;
    }

    changed
}
