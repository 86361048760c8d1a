use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const ENV_BASE_URL: &str = "STOREFRONT_BASE_URL";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// The server issues access credentials valid for fifteen minutes; the
/// proactive probe runs well inside that window.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(400);
/// Server-side per-line maximum; edits are clamped before they enter the
/// debounce buffer.
pub const DEFAULT_QUANTITY_BOUNDS: RangeInclusive<u32> = 1..=20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
}

/// Client-wide configuration, passed explicitly to every component that
/// needs a slice of it. No ambient globals.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub renewal_interval: Duration,
    pub debounce_window: Duration,
    pub quantity_bounds: RangeInclusive<u32>,
}

impl ClientConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            quantity_bounds: DEFAULT_QUANTITY_BOUNDS,
        })
    }

    /// Resolve the base url from `STOREFRONT_BASE_URL`, falling back to the
    /// local default.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env_non_empty(ENV_BASE_URL) {
            Some(base_url) => Self::new(base_url),
            None => Self::new(DEFAULT_BASE_URL),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(250))
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
