//! Scraper configuration.

use crate::errors::ScrapeflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a scraping run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Maximum number of units of work running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Rate limiting of network-bound steps.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// HTTP fetching.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Pagination limits.
    #[serde(default)]
    pub pagination: PaginationConfig,
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            throttle: ThrottleConfig::default(),
            fetch: FetchConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }
}

impl ScraperConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ScrapeflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScrapeflowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), ScrapeflowError> {
        if self.max_concurrency == 0 {
            return Err(ScrapeflowError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        self.fetch.timeout()?;
        Ok(())
    }

    /// Sets the worker pool size. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Sets the throttle configuration.
    #[must_use]
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Caps the number of pages any paginate step will process.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.pagination.max_pages = Some(max_pages);
        self
    }
}

/// Rate limiting of network-bound units of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Whether throttling is applied at all.
    #[serde(default = "default_throttle_enabled")]
    pub enabled: bool,
    /// Minimum time between two network-bound admissions.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Random extra delay added to each interval.
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_throttle_enabled() -> bool {
    true
}

fn default_min_interval_ms() -> u64 {
    250
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_throttle_enabled(),
            min_interval_ms: default_min_interval_ms(),
            jitter_ms: 0,
        }
    }
}

impl ThrottleConfig {
    /// A configuration that admits everything immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Minimum interval as a `Duration`.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Configuration for HTTP fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    "scrapeflow/0.1".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            headers: HashMap::new(),
        }
    }
}

impl FetchConfig {
    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets timeout as Duration.
    ///
    /// Fails on a negative, NaN or unrepresentably large `timeout_seconds`.
    pub fn timeout(&self) -> Result<Duration, ScrapeflowError> {
        Duration::try_from_secs_f64(self.timeout_seconds).map_err(|e| {
            ScrapeflowError::Configuration(format!(
                "invalid fetch timeout {}: {e}",
                self.timeout_seconds
            ))
        })
    }
}

/// Pagination limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Maximum pages processed per paginate invocation; unlimited when unset.
    #[serde(default)]
    pub max_pages: Option<usize>,
}
