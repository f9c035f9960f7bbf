//! Registry configuration

use std::time::Duration;

/// External stream registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry service; entries live at `<url>/streams`
    pub url: String,

    /// Interval between reconciliation passes
    pub poll_interval: Duration,

    /// Base of the redirect targets registered for each stream; must name
    /// the stream server's HTTP endpoint
    pub redirect_base: String,

    /// Timeout of a single registry request
    pub request_timeout: Duration,

    /// Run the reconciler at all
    pub enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6020".to_string(),
            poll_interval: Duration::from_secs(3),
            redirect_base: "http://127.0.0.1:8554".to_string(),
            request_timeout: Duration::from_secs(5),
            enabled: true,
        }
    }
}

impl RegistryConfig {
    /// Create a config for the registry at `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the redirect base
    pub fn redirect_base(mut self, base: impl Into<String>) -> Self {
        self.redirect_base = base.into();
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Disable registry reconciliation
    pub fn disable(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// URL of the streams collection
    pub fn streams_url(&self) -> String {
        format!("{}/streams", self.url.trim_end_matches('/'))
    }

    /// Redirect target for an endpoint path
    pub fn redirect_url(&self, endpoint_path: &str) -> String {
        format!(
            "{}/{}",
            self.redirect_base.trim_end_matches('/'),
            endpoint_path.trim_start_matches('/')
        )
    }
}
