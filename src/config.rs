//! Application configuration persistence
//!
//! Stores tunables in ~/.config/tempotune/config.json. Missing fields fall back to
//! their defaults so older config files keep loading after new settings are added.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "tempotune";

/// Persistent application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Config format version
    pub version: u32,
    /// SQLite database location (defaults to the user data directory)
    pub database_path: Option<PathBuf>,
    /// How far back used tracks are excluded from new playlists
    pub history_window_days: i64,
    /// Playlists older than this are deleted by housekeeping
    pub playlist_max_age_days: i64,
    /// How many times resolution may ask for more candidates
    pub max_extension_rounds: u32,
    /// Number of pipeline tasks running at once
    pub queue_concurrency: usize,
    /// Base delay between retries, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Minutes between calendar sweeps in `worker` mode
    pub sweep_interval_minutes: u64,
    /// Cover art encoding settings
    pub cover: CoverSettings,
    /// External service settings
    pub services: ServiceSettings,
}

/// Cover art encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverSettings {
    /// Maximum width/height of the uploaded cover
    pub max_dimension: u32,
    /// First JPEG quality tried
    pub start_quality: u8,
    /// Quality decrease per attempt
    pub quality_step: u8,
    /// Lowest JPEG quality tried before giving up
    pub min_quality: u8,
    /// Ceiling for the base64-encoded payload
    pub max_payload_bytes: usize,
}

/// External service endpoints and models
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub openai_base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub spotify_api_url: String,
    pub spotify_accounts_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            database_path: None,
            history_window_days: 14,
            playlist_max_age_days: 30,
            max_extension_rounds: 1,
            queue_concurrency: 4,
            retry_base_delay_ms: 2_000,
            sweep_interval_minutes: 15,
            cover: CoverSettings::default(),
            services: ServiceSettings::default(),
        }
    }
}

impl Default for CoverSettings {
    fn default() -> Self {
        Self {
            max_dimension: 640,
            start_quality: 80,
            quality_step: 5,
            min_quality: 10,
            max_payload_bytes: 250 * 1024,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            spotify_api_url: "https://api.spotify.com/v1".to_string(),
            spotify_accounts_url: "https://accounts.spotify.com".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the config from its default location, writing defaults on first run
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load the config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config found at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: Self =
            serde_json::from_str(&contents).with_context(|| "Failed to parse config")?;

        debug!("Loaded config from {}", path.display());
        Ok(config.normalized())
    }

    /// Save the config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Resolved database location
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join(APP_DIR).join("tempotune.db3"))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }

    /// Clamp values that would break pipeline invariants
    fn normalized(mut self) -> Self {
        self.history_window_days = self.history_window_days.max(1);
        // Purging before the history window closes would let tracks repeat early
        self.playlist_max_age_days = self.playlist_max_age_days.max(self.history_window_days);
        self.queue_concurrency = self.queue_concurrency.max(1);
        self.cover.quality_step = self.cover.quality_step.max(1);
        self.cover.min_quality = self.cover.min_quality.clamp(1, 100);
        self.cover.start_quality = self.cover.start_quality.clamp(self.cover.min_quality, 100);
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.history_window_days, 14);
        assert_eq!(config.cover.start_quality, 80);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"history_window_days": 30, "cover": {"min_quality": 20}}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.history_window_days, 30);
        assert_eq!(config.cover.min_quality, 20);
        assert_eq!(config.cover.quality_step, 5);
        assert_eq!(config.services.chat_model, "gpt-4o");
    }

    #[test]
    fn test_max_age_never_shorter_than_history_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"history_window_days": 21, "playlist_max_age_days": 7}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.playlist_max_age_days, 21);
    }
}
