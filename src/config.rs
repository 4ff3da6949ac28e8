//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the prayer-config.toml file.
//! It provides a centralized way to configure the remote services, cache lifetimes,
//! location-watch granularity and other runtime parameters.

use crate::methods::DEFAULT_METHOD;
use crate::prayer_times::TimingAdjustments;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "prayer-config.toml";

/// Application configuration loaded from prayer-config.toml
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Remote schedule and geocoding services
    pub api: ApiConfig,
    /// Location cache and watch settings
    pub location: LocationConfig,
    /// Prayer-table cache settings
    pub schedule: ScheduleConfig,
    /// Session timing
    pub session: SessionConfig,
    /// Where persisted entries live
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Schedule service root, without the `/v1` path
    pub base_url: String,
    /// Reverse-geocoding service root
    pub geocoder_url: String,
    /// Identifying User-Agent; the geocoder refuses anonymous requests
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationConfig {
    /// How long a resolved location is reused without asking the platform again
    pub cache_ttl_minutes: i64,
    /// Minimum movement between watch reports
    pub watch_distance_meters: f64,
    /// Minimum time between watch reports
    pub watch_interval_secs: u64,
    /// Moves smaller than this do not refetch the prayer table
    pub refetch_threshold_km: f64,
    /// Manual position used when no positioning hardware is available
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub cache_ttl_minutes: i64,
    /// Two positions closer than this on both axes share a cached table
    pub proximity_degrees: f64,
    /// Method used until the user picks one
    pub default_method: u8,
    #[serde(default)]
    pub adjustments: Option<TimingAdjustments>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Next-prayer recompute period
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("prayer-tracker"),
        None => std::env::temp_dir().join("prayer-tracker"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: ApiConfig {
                base_url: "https://api.aladhan.com".to_string(),
                geocoder_url: "https://nominatim.openstreetmap.org".to_string(),
                user_agent: concat!("prayer-tracker/", env!("CARGO_PKG_VERSION")).to_string(),
                timeout_secs: 10,
            },
            location: LocationConfig {
                cache_ttl_minutes: 5,
                watch_distance_meters: 10.0,
                watch_interval_secs: 5,
                refetch_threshold_km: 1.0,
                latitude: None,
                longitude: None,
            },
            schedule: ScheduleConfig {
                cache_ttl_minutes: 60,
                proximity_degrees: 0.01,
                default_method: DEFAULT_METHOD,
                adjustments: None,
            },
            session: SessionConfig { tick_secs: 60 },
            storage: StorageConfig {
                dir: default_storage_dir(),
            },
        }
    }
}

impl Config {
    /// Load configuration from prayer-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.as_ref().display());
                    config
                }
                Err(e) => {
                    warn!("Invalid config file format: {}", e);
                    warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Save current configuration to prayer-config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(CONFIG_FILE)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}
