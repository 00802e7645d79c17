//! WebSocket session configuration.

use std::time::Duration;

use crate::{backoff::BackoffConfig, config::EndpointConfig, error::ConfigError};

/// Configuration for a [`WebSocketSession`](super::WebSocketSession).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,

    // Reconnection
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_backoff_factor: f64,
    /// Reconnect attempts before giving up. `None` retries forever.
    pub reconnect_max_attempts: Option<u32>,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub reconnect_jitter: f64,

    // Heartbeat
    /// Interval between `{"type":"ping"}` frames.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the connection is declared dead.
    pub pong_timeout: Duration,

    /// Frames kept while disconnected; the oldest are dropped beyond this.
    pub max_queue_size: usize,
    /// Capacity of the session event broadcast channel.
    pub event_channel_capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            reconnect_max_attempts: Some(10),
            reconnect_jitter: 0.0,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_queue_size: 100,
            event_channel_capacity: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Session config pointing at the endpoint's socket URL.
    pub fn from_endpoint(endpoint: &EndpointConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(endpoint.socket_url()?.to_string()))
    }

    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    #[must_use]
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        self.backoff().validate()?;
        if self.ping_interval.is_zero() {
            return Err("Ping interval must be > 0".to_string());
        }
        if self.pong_timeout.is_zero() {
            return Err("Pong timeout must be > 0".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("Max queue size must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_with_url_is_valid() {
        let config = SessionConfig::new("wss://stream.example.com");
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_errors() {
        assert!(SessionConfig::default().validate().is_err());
        assert!(
            SessionConfig::new("ws://x")
                .max_queue_size(0)
                .validate()
                .is_err()
        );
        assert!(
            SessionConfig::new("ws://x")
                .reconnect_max_delay(Duration::from_millis(1))
                .validate()
                .is_err()
        );
        assert!(
            SessionConfig::new("ws://x")
                .pong_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_endpoint() {
        let endpoint = EndpointConfig::new("https://api.example.com");
        let config = SessionConfig::from_endpoint(&endpoint).unwrap();
        assert_eq!(config.url, "wss://api.example.com/");
    }
}
