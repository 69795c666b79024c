//! Client configuration.
//!
//! The base URL is resolved once, when the config is built, and is immutable
//! afterwards. `from_env` is the only place that touches the process
//! environment.

use std::time::Duration;

/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "API_URL";

/// Used when `API_URL` is unset or blank.
pub const DEFAULT_BASE_URL: &str = "https://api.example.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    /// Reads `API_URL`, falling back to [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(BASE_URL_ENV).ok())
    }

    pub fn from_env_value(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Self::new(url),
            _ => Self::default(),
        }
    }

    /// Global timeout for a single round trip, applied by the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}
