//! Endpoint configuration shared by the HTTP client and the WebSocket session.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Environment variable holding the HTTP base URL.
pub const API_BASE_URL_ENV: &str = "API_BASE_URL";
/// Optional environment variable overriding the socket URL.
pub const WS_URL_ENV: &str = "WS_URL";

/// Where the backend lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// HTTP(S) base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Socket URL; derived from `base_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ws_url: None,
        }
    }

    #[must_use]
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    /// Read `API_BASE_URL` and optionally `WS_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup(API_BASE_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnv {
                name: API_BASE_URL_ENV,
            })?;
        let config = Self {
            base_url,
            ws_url: lookup(WS_URL_ENV).filter(|v| !v.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http_url()?;
        self.socket_url()?;
        Ok(())
    }

    /// Parsed HTTP base URL.
    pub fn http_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid_url(&self.base_url, e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::invalid_url(
                &self.base_url,
                format!("unsupported scheme `{other}`"),
            )),
        }
    }

    /// Socket URL: the explicit override, or the base URL with `http`→`ws`
    /// and `https`→`wss`.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        if let Some(ws_url) = &self.ws_url {
            let url = Url::parse(ws_url).map_err(|e| ConfigError::invalid_url(ws_url, e))?;
            return match url.scheme() {
                "ws" | "wss" => Ok(url),
                other => Err(ConfigError::invalid_url(
                    ws_url,
                    format!("unsupported scheme `{other}`"),
                )),
            };
        }
        derive_socket_url(&self.http_url()?)
    }

    /// Join a relative path onto the base URL. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<String, ConfigError> {
        resolve_url(&self.base_url, path)
    }
}

/// Swap the scheme of an HTTP(S) URL for its WebSocket counterpart.
pub fn derive_socket_url(http: &Url) -> Result<Url, ConfigError> {
    let scheme = match http.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ConfigError::invalid_url(
                http.as_str(),
                format!("cannot derive socket URL from scheme `{other}`"),
            ));
        }
    };
    // ws_url = "{scheme}://{rest}" keeps host, port, path and query intact.
    let rest = &http.as_str()[http.scheme().len()..];
    Url::parse(&format!("{scheme}{rest}")).map_err(|e| ConfigError::invalid_url(http.as_str(), e))
}

/// Resolve `path` against `base`. Absolute `http(s)` URLs are returned as is.
pub fn resolve_url(base: &str, path: &str) -> Result<String, ConfigError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    if base.is_empty() {
        return Ok(path.to_string());
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    };
    Url::parse(&joined)
        .map(|url| url.to_string())
        .map_err(|e| ConfigError::invalid_url(joined, e))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_socket_url_derivation() {
        let config = EndpointConfig::new("https://api.example.com:8443/v1");
        assert_eq!(
            config.socket_url().unwrap().as_str(),
            "wss://api.example.com:8443/v1"
        );

        let config = EndpointConfig::new("http://localhost:3000");
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://localhost:3000/");
    }

    #[test]
    fn test_explicit_socket_url_wins() {
        let config =
            EndpointConfig::new("https://api.example.com").with_ws_url("wss://stream.example.com/ws");
        assert_eq!(
            config.socket_url().unwrap().as_str(),
            "wss://stream.example.com/ws"
        );

        let bad = EndpointConfig::new("https://api.example.com").with_ws_url("https://nope");
        assert!(bad.socket_url().is_err());
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(EndpointConfig::new("ftp://example.com").validate().is_err());
        assert!(EndpointConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [("API_BASE_URL", "https://api.example.com")].into();
        let config = EndpointConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert!(config.ws_url.is_none());

        let missing = EndpointConfig::from_lookup(|_| None);
        assert_eq!(
            missing.unwrap_err(),
            ConfigError::MissingEnv {
                name: API_BASE_URL_ENV
            }
        );
    }

    #[test]
    fn test_resolve() {
        let config = EndpointConfig::new("https://api.example.com/v1/");
        assert_eq!(
            config.resolve("/stats").unwrap(),
            "https://api.example.com/v1/stats"
        );
        assert_eq!(
            config.resolve("https://other.example.com/x").unwrap(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_deserialize() {
        let config: EndpointConfig =
            serde_json::from_str(r#"{"base_url":"https://api.example.com"}"#).unwrap();
        assert!(config.validate().is_ok());
    }
}
