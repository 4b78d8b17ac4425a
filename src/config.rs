//! Configuration for the dashboard, loaded from a JSON file
//!
//! Every section is optional; missing fields fall back to defaults that
//! point at Himeji with five-minute refresh intervals. Provider credentials
//! are only required once calendars or task lists are configured.

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_REFRESH_SECS: i64 = 300;

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid JSON
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    /// The config parsed but holds an unusable value
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub refresh_intervals: RefreshIntervals,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// How long each source's cached data stays fresh, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshIntervals {
    #[serde(default = "default_refresh_secs")]
    pub weather_sec: i64,
    #[serde(default = "default_refresh_secs")]
    pub calendar_sec: i64,
    #[serde(default = "default_refresh_secs")]
    pub tasks_sec: i64,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            weather_sec: DEFAULT_REFRESH_SECS,
            calendar_sec: DEFAULT_REFRESH_SECS,
            tasks_sec: DEFAULT_REFRESH_SECS,
        }
    }
}

fn default_refresh_secs() -> i64 {
    DEFAULT_REFRESH_SECS
}

/// Where the household is, for weather lookups
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default = "default_city")]
    pub city_name: String,
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            city_name: default_city(),
            country: default_country(),
        }
    }
}

fn default_city() -> String {
    "himeji".to_string()
}

fn default_country() -> String {
    "JP".to_string()
}

/// Connection details for the CalDAV bridge
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Names of the shared calendars to aggregate
    #[serde(default)]
    pub calendar_names: Vec<String>,
    /// Names of the shared task lists to aggregate
    #[serde(default)]
    pub task_list_names: Vec<String>,
}

impl Config {
    /// Loads and validates configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns how long a source's cached data stays fresh.
    ///
    /// Unknown source names get the default interval.
    pub fn refresh_interval(&self, source: &str) -> Duration {
        let secs = match source {
            "weather" => self.refresh_intervals.weather_sec,
            "calendar" => self.refresh_intervals.calendar_sec,
            "tasks" => self.refresh_intervals.tasks_sec,
            _ => DEFAULT_REFRESH_SECS,
        };
        Duration::seconds(secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_intervals.weather_sec <= 0 {
            return Err(ConfigError::Invalid(
                "refreshIntervals.weatherSec must be positive".to_string(),
            ));
        }
        if self.refresh_intervals.calendar_sec <= 0 {
            return Err(ConfigError::Invalid(
                "refreshIntervals.calendarSec must be positive".to_string(),
            ));
        }
        if self.refresh_intervals.tasks_sec <= 0 {
            return Err(ConfigError::Invalid(
                "refreshIntervals.tasksSec must be positive".to_string(),
            ));
        }
        if self.location.city_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "location.cityName must not be empty".to_string(),
            ));
        }
        if self.location.country.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "location.country must not be empty".to_string(),
            ));
        }

        // Credentials only matter once something needs the bridge.
        if !self.provider.calendar_names.is_empty() || !self.provider.task_list_names.is_empty() {
            if self.provider.server_url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "provider.serverUrl is required when calendars or task lists are configured"
                        .to_string(),
                ));
            }
            if self.provider.username.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "provider.username is required when calendars or task lists are configured"
                        .to_string(),
                ));
            }
            if self.provider.password.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "provider.password is required when calendars or task lists are configured"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}
