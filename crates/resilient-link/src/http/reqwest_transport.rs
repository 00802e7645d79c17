//! [`Transport`] backed by `reqwest`.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;

use crate::{
    error::ConfigError,
    transport::{NetworkFailureKind, Request, Response, Transport, TransportFailure},
};

/// Sends requests with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Client with a connect timeout; per-request deadlines are enforced by
    /// the HTTP client.
    pub fn new() -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::invalid(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn network_failure(error: reqwest::Error) -> TransportFailure {
    let kind = if error.is_timeout() {
        NetworkFailureKind::Timeout
    } else if error.is_connect() {
        let text = format!("{error:?}").to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            NetworkFailureKind::Dns
        } else {
            NetworkFailureKind::ConnectionRefused
        }
    } else if error.is_request() || error.is_body() {
        NetworkFailureKind::ConnectionReset
    } else {
        NetworkFailureKind::Other
    };
    TransportFailure::network(kind, error.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportFailure> {
        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(network_failure)?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(network_failure)?;

        let mut out = Response::new(request.id, status, body);
        out.headers = headers;
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds() {
        let transport = ReqwestTransport::new().unwrap();
        assert_eq!(transport.name(), "reqwest");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let transport = ReqwestTransport::new().unwrap();
        // Port 9 (discard) on loopback is expected to refuse connections.
        let failure = transport
            .send(Request::get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(matches!(failure, TransportFailure::Network { .. }));
    }
}
