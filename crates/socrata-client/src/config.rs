//! Client configuration and builder pattern.

use crate::error::{ClientError, Result};
use std::fmt;
use std::time::Duration;

/// Configuration for a client bound to one Socrata view.
///
/// # Security
///
/// The `Debug` implementation masks the app token so it does not leak into
/// logs. The token is shown as `"***REDACTED***"` in debug output.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the Socrata domain (e.g., "https://data.seattle.gov")
    pub base_url: String,
    /// View identifier of the dataset (e.g., "it8u-sznv")
    pub view_id: String,
    /// Optional application token sent as `X-App-Token`
    pub app_token: Option<String>,
    /// Request timeout (default: 30 seconds)
    pub timeout: Duration,
    /// Maximum number of transport retries for transient failures (default: 3)
    pub max_retries: u32,
    /// Initial retry delay for exponential backoff (default: 100ms)
    pub retry_initial_delay: Duration,
    /// Maximum retry delay (default: 10 seconds)
    pub retry_max_delay: Duration,
    /// Query submissions allowed while the schema is reported stale (default: 3)
    pub max_stale_retries: u32,
    /// How long a fetched schema stays valid (default: until invalidated)
    pub schema_ttl: Option<Duration>,
    /// Whether to verify TLS certificates (default: true)
    pub tls_verify: bool,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            view_id: String::new(),
            app_token: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
            max_stale_retries: 3,
            schema_ttl: None,
            tls_verify: true,
            user_agent: format!("socrata-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("view_id", &self.view_id)
            .field("app_token", &self.app_token.as_ref().map(|_| "***REDACTED***"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_delay", &self.retry_initial_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("max_stale_retries", &self.max_stale_retries)
            .field("schema_ttl", &self.schema_ttl)
            .field("tls_verify", &self.tls_verify)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    ///
    /// `host` may be a bare domain ("data.seattle.gov"), in which case
    /// `http://` is assumed, or a full base URL.
    pub fn builder(host: impl Into<String>, view_id: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(host, view_id)
    }

    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("base_url cannot be empty".to_string()));
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base_url: {}", e)))?;

        if self.view_id.trim().is_empty() {
            return Err(ClientError::Config("view_id cannot be empty".to_string()));
        }

        if self.max_stale_retries == 0 {
            return Err(ClientError::Config(
                "max_stale_retries must be at least 1".to_string(),
            ));
        }

        if self.retry_initial_delay > self.retry_max_delay {
            return Err(ClientError::Config(format!(
                "retry_initial_delay ({:?}) must be <= retry_max_delay ({:?})",
                self.retry_initial_delay, self.retry_max_delay
            )));
        }

        if self.timeout < Self::MIN_TIMEOUT {
            return Err(ClientError::Config(format!(
                "timeout ({:?}) must be >= {:?}",
                self.timeout,
                Self::MIN_TIMEOUT
            )));
        }

        Ok(())
    }
}

/// Prefix a bare host with `http://`, leaving full URLs untouched.
fn normalize_base_url(host: String) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Builder for client configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder for the given host and view.
    pub fn new(host: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                base_url: normalize_base_url(host.into()),
                view_id: view_id.into(),
                ..Default::default()
            },
        }
    }

    /// Set the application token.
    pub fn app_token(mut self, app_token: impl Into<String>) -> Self {
        self.config.app_token = Some(app_token.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum number of transport retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay for exponential backoff.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Set how many submissions a query may make while the schema is stale.
    pub fn max_stale_retries(mut self, attempts: u32) -> Self {
        self.config.max_stale_retries = attempts;
        self
    }

    /// Expire the cached schema after `ttl`.
    pub fn schema_ttl(mut self, ttl: Duration) -> Self {
        self.config.schema_ttl = Some(ttl);
        self
    }

    /// Set whether to verify TLS certificates.
    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.config.tls_verify = verify;
        self
    }

    /// Set a custom User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
