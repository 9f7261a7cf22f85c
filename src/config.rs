use std::time::Duration;

use tracing::warn;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api";

/// Configuration for the caption backend client and the batch controller.
///
/// Use [`ClientConfig::builder()`] for ergonomic construction,
/// [`ClientConfig::from_env()`] to pick up environment overrides, or
/// [`ClientConfig::default()`] for a local backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the caption backend API.
    pub endpoint: String,

    /// Interval between batch status fetches while a job is active.
    pub poll_interval: Duration,

    /// Interval between folder stats refreshes while a job is running.
    pub folder_refresh_interval: Duration,

    /// Timeout applied to every backend request.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(1),
            folder_refresh_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overridden by `CAPTION_API_URL`, `CAPTION_POLL_INTERVAL_MS`,
    /// `CAPTION_FOLDER_REFRESH_MS` and `CAPTION_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CAPTION_API_URL") {
            if !url.trim().is_empty() {
                config.endpoint = url;
            }
        }
        if let Some(ms) = parse_u64(&lookup, "CAPTION_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "CAPTION_FOLDER_REFRESH_MS") {
            config.folder_refresh_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, "CAPTION_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            warn!("Ignoring {}=0", key);
            None
        }
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the backend base URL (e.g. `http://localhost:8000/api`).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the status polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the folder stats refresh interval used while a job runs.
    pub fn with_folder_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.folder_refresh_interval = interval;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build the final [`ClientConfig`].
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
