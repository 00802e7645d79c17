use std::{collections::BTreeMap, time::Duration};

use crate::{
    config::EndpointConfig,
    error::ConfigError,
    retry::{RetryOptions, RetryOverrides},
};

/// Header carrying the idempotency key to the backend.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Prepended to relative request paths. Empty means paths must be absolute.
    pub base_url: String,
    /// Per-attempt timeout used when a request does not set one.
    pub timeout: Duration,
    pub retry: RetryOptions,
    pub default_headers: Vec<(String, String)>,
    /// Collapse concurrent identical GETs.
    pub dedup_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            retry: RetryOptions::default(),
            default_headers: vec![("Accept".to_string(), "application/json".to_string())],
            dedup_enabled: true,
        }
    }
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_endpoint(endpoint: &EndpointConfig) -> Result<Self, ConfigError> {
        endpoint.http_url()?;
        Ok(Self::new(endpoint.base_url.clone()))
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn dedup_enabled(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("Timeout must be > 0"));
        }
        self.retry.validate().map_err(ConfigError::invalid)?;
        if !self.base_url.is_empty() {
            EndpointConfig::new(self.base_url.clone()).http_url()?;
        }
        Ok(())
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Overrides [`HttpConfig::timeout`] for each attempt.
    pub timeout: Option<Duration>,
    pub skip_retry: bool,
    /// GET only: bypass the deduplicator.
    pub skip_dedup: bool,
    pub retry: RetryOverrides,
    /// Query parameters; ordering is irrelevant.
    pub params: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    /// Sent as the `Idempotency-Key` header.
    pub idempotency_key: Option<String>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn skip_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    #[must_use]
    pub fn skip_dedup(mut self) -> Self {
        self.skip_dedup = true;
        self
    }

    #[must_use]
    pub fn retry(mut self, overrides: RetryOverrides) -> Self {
        self.retry = overrides;
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Effective retry options for this call.
    pub fn retry_options(&self, base: &RetryOptions) -> RetryOptions {
        if self.skip_retry {
            RetryOverrides::default().max_retries(0).apply(base)
        } else {
            self.retry.apply(base)
        }
    }
}
