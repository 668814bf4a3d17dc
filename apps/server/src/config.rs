//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sonos_sync::{HouseholdFixture, SyncConfig, ViewOptions};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Engine options. Also accepts the legacy names
    /// (`listen_with_polling`, `polling_timeout`, `debug`).
    /// Overrides: `SONOS_SYNC_USE_EVENT_MODE`, `SONOS_SYNC_POLLING_INTERVAL_MS`,
    /// `SONOS_SYNC_DEBUG`
    pub sync: SyncConfig,

    /// How now-playing lines are built from the mirrored state.
    pub view: ViewOptions,

    /// Household fixture replayed by the in-memory provider.
    /// Override: `--fixture` / `SONOS_SYNC_FIXTURE` (handled by clap)
    pub fixture: Option<PathBuf>,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config
            .sync
            .validate()
            .context("Invalid synchronization settings")?;
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("SONOS_SYNC_USE_EVENT_MODE").and_then(|v| parse_flag(&v)) {
            self.sync.use_event_mode = enabled;
        }

        if let Some(val) = lookup("SONOS_SYNC_POLLING_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.sync.polling_interval_ms = interval;
            }
        }

        if let Some(enabled) = lookup("SONOS_SYNC_DEBUG").and_then(|v| parse_flag(&v)) {
            self.sync.debug_logging = enabled;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads a household fixture (YAML or JSON).
pub fn load_fixture(path: &Path) -> Result<HouseholdFixture> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse fixture: {}", path.display()))
}
