//! Configuration management for the device runtime.

use ferry_engine::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Client configuration, loaded from environment variables or built in code.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite connection URL of the local durable store
    pub database_url: String,
    /// Base URL of the remote store, when talking HTTP
    pub remote_url: Option<String>,
    /// Bearer token presented to the remote
    pub auth_token: Option<String>,
    /// Identifies this device in logs and request headers
    pub device_id: String,
    /// Backoff and attempt ceiling for transient failures
    pub retry: RetryPolicy,
    /// Quiet period after a reconnect before a pass starts
    pub settle_delay: Duration,
    /// Upper bound on a single remote call
    pub request_timeout: Duration,
    /// Run a pass on a timer as well as on events
    pub pass_interval: Option<Duration>,
    /// Buffered triggers before new ones are dropped
    pub trigger_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ferry.db".to_string(),
            remote_url: None,
            auth_token: None,
            device_id: "device".to_string(),
            retry: RetryPolicy::default(),
            settle_delay: Duration::from_millis(1_500),
            request_timeout: Duration::from_millis(10_000),
            pass_interval: None,
            trigger_capacity: 32,
        }
    }
}

impl ClientConfig {
    /// Configuration for the given store with everything else defaulted.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = env::var("FERRY_DATABASE_URL").unwrap_or(defaults.database_url);
        let remote_url = env::var("FERRY_REMOTE_URL").ok();
        let auth_token = env::var("FERRY_AUTH_TOKEN").ok();
        let device_id = env::var("FERRY_DEVICE_ID").unwrap_or(defaults.device_id);

        let retry = RetryPolicy::new(
            parse_var("FERRY_MAX_ATTEMPTS")?.unwrap_or(defaults.retry.max_attempts),
            parse_var("FERRY_BACKOFF_BASE_MS")?.unwrap_or(defaults.retry.base_delay_ms),
            parse_var("FERRY_BACKOFF_MAX_MS")?.unwrap_or(defaults.retry.max_delay_ms),
        );
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "FERRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let settle_delay = parse_var("FERRY_SETTLE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.settle_delay);
        let request_timeout = parse_var("FERRY_REQUEST_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);
        let pass_interval = parse_var("FERRY_PASS_INTERVAL_MS")?.map(Duration::from_millis);

        Ok(Self {
            database_url,
            remote_url,
            auth_token,
            device_id,
            retry,
            settle_delay,
            request_timeout,
            pass_interval,
            trigger_capacity: defaults.trigger_capacity,
        })
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pass_interval(mut self, interval: Duration) -> Self {
        self.pass_interval = Some(interval);
        self
    }

    /// Whether the store lives only in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("FERRY_REMOTE_URL is required for the HTTP remote")]
    MissingRemoteUrl,
}
