//! User preferences persistence.
//!
//! Saves default session settings to ~/.config/pingpoll/config.toml.
//! Every field is optional; explicit command-line flags win over stored
//! values, and stored values win over built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AddressFamily, Settings};

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_window: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<AddressFamily>,
    /// Status refresh period in seconds, independent of the probe interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<f64>,
}

impl Prefs {
    /// Get config file path: ~/.config/pingpoll/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pingpoll").join("config.toml"))
    }

    /// Load preferences from disk (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => toml::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!("ignoring invalid preferences in {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save preferences to disk
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Capture the session-shaping parts of `settings`
    ///
    /// Count and duration describe one run, so they are never stored.
    pub fn from_settings(settings: &Settings, refresh: Option<f64>) -> Self {
        Self {
            host: Some(settings.host.clone()),
            interval: Some(settings.interval),
            timeout: Some(settings.timeout),
            window: Some(settings.window),
            stats_window: Some(settings.stats_window),
            max_in_flight: Some(settings.max_in_flight),
            payload_size: Some(settings.payload_size),
            family: Some(settings.family),
            refresh,
        }
    }

    /// Settings built from stored values over the defaults
    pub fn to_settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            host: self.host.clone().unwrap_or(defaults.host),
            interval: self.interval.unwrap_or(defaults.interval),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            window: self.window.unwrap_or(defaults.window),
            stats_window: self.stats_window.unwrap_or(defaults.stats_window),
            max_in_flight: self.max_in_flight.unwrap_or(defaults.max_in_flight),
            count: None,
            duration: None,
            payload_size: self.payload_size.unwrap_or(defaults.payload_size),
            family: self.family.unwrap_or(defaults.family),
        }
    }
}
