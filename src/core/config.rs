use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::queue::retention::RetentionPolicy;

pub const TIMELINE_CACHE_VERSION: u32 = 1;
pub const DEFAULT_MAX_ITEM_AGE_DAYS: i64 = 30;
pub const DEFAULT_MAX_ITEMS_PER_FOLDER: usize = 100;
pub const DEFAULT_STORAGE_KEY: &str = "rssr:timeline-cache";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_PAGE_SIZE: i64 = 200;
const ENV_FILE: &str = ".env.local";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    pub schema_version: u32,
    pub max_item_age_days: i64,
    pub max_items_per_folder: usize,
    pub storage_key: String,
    pub refresh_interval_secs: u64,
    pub page_size: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            schema_version: TIMELINE_CACHE_VERSION,
            max_item_age_days: DEFAULT_MAX_ITEM_AGE_DAYS,
            max_items_per_folder: DEFAULT_MAX_ITEMS_PER_FOLDER,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(ENV_FILE);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            schema_version: defaults.schema_version,
            max_item_age_days: parse_or(&lookup, "RSSR_CACHE_MAX_AGE_DAYS", defaults.max_item_age_days)?,
            max_items_per_folder: parse_or(&lookup, "RSSR_CACHE_MAX_ITEMS", defaults.max_items_per_folder)?,
            storage_key: lookup("RSSR_CACHE_STORAGE_KEY")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.storage_key),
            refresh_interval_secs: parse_or(&lookup, "RSSR_REFRESH_INTERVAL_SECS", defaults.refresh_interval_secs)?,
            page_size: parse_or(&lookup, "RSSR_PAGE_SIZE", defaults.page_size)?,
        })
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_days(self.max_item_age_days, self.max_items_per_folder)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsApiConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: usize,
}

impl NewsApiConfig {
    /// Returns `Ok(None)` when no server credentials are configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let _ = dotenvy::from_filename(ENV_FILE);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("RSSR_NEWS_BASE_URL").unwrap_or_default();
        let username = lookup("RSSR_NEWS_USERNAME").unwrap_or_default();
        let password = lookup("RSSR_NEWS_PASSWORD").unwrap_or_default();
        if base_url.trim().is_empty() || username.trim().is_empty() || password.is_empty() {
            return Ok(None);
        }
        let config = Self {
            base_url: base_url.trim().to_string(),
            username: username.trim().to_string(),
            password,
            timeout_secs: parse_or(&lookup, "RSSR_NEWS_TIMEOUT_SECS", 20)?,
            max_retries: parse_or(&lookup, "RSSR_NEWS_MAX_RETRIES", 2)?,
        };
        validate_config(&config)?;
        Ok(Some(config))
    }
}

pub fn validate_config(config: &NewsApiConfig) -> Result<(), ConfigError> {
    if config.base_url.trim().is_empty() {
        return Err(ConfigError::Missing("base_url"));
    }
    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "base_url must use http or https: {}",
            config.base_url
        )));
    }
    if config.username.trim().is_empty() {
        return Err(ConfigError::Missing("username"));
    }
    if config.password.is_empty() {
        return Err(ConfigError::Missing("password"));
    }
    if config.timeout_secs == 0 {
        return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        _ => Ok(default),
    }
}
