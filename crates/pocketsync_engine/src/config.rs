//! Configuration for the cache engine and sync coordinator.

use std::time::Duration;

/// Configuration for a data store client.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the backend (e.g. "https://api.example.com").
    pub base_url: String,
    /// Application key identifying the backend tenant.
    pub app_key: String,
    /// Optional time-to-live for cached entities. When set, local reads
    /// hide entities whose last-modified time is older than `now - ttl`;
    /// expired rows are not deleted, only filtered.
    pub ttl: Option<Duration>,
    /// Whether pulls use incremental delta-set sync once a checkpoint
    /// exists.
    pub delta_set: bool,
    /// Request timeout handed to the transport.
    pub timeout: Duration,
}

impl StoreConfig {
    /// Creates a configuration with defaults: no TTL, delta-set disabled,
    /// 30 second timeout.
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            ttl: None,
            delta_set: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enables or disables delta-set sync.
    #[must_use]
    pub fn with_delta_set(mut self, enabled: bool) -> Self {
        self.delta_set = enabled;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
