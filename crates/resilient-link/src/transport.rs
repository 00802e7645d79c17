//! Transport primitive consumed by the HTTP client.
//!
//! The client never talks to the network itself. It hands a [`Request`] to a
//! [`Transport`] and gets back either a [`Response`] (any status) or a
//! [`TransportFailure`] describing why no response arrived.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP verbs exposed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Reads that may be collapsed by the deduplicator.
    pub fn is_safe(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
        }
    }
}

/// An outgoing request as seen by interceptors and the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub created_at: SystemTime,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Add a header to the request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter to the request.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(data)?;
        self.body = Some(body.into());
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Get the age of this request.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or(Duration::ZERO)
    }
}

/// A response as returned by the transport.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Round-trip time, filled in by the client.
    pub duration: Duration,
}

impl Response {
    pub fn new(request_id: RequestId, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            status,
            headers: HashMap::new(),
            body: body.into(),
            duration: Duration::ZERO,
        }
    }

    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the response body as JSON. An empty body parses as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.body.is_empty() {
            return serde_json::from_slice(b"null");
        }
        serde_json::from_slice(&self.body)
    }

    /// Get the response body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Why a network failure happened, as far as the transport could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailureKind {
    ConnectionRefused,
    ConnectionReset,
    Dns,
    Timeout,
    Other,
}

impl fmt::Display for NetworkFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Dns => "dns resolution failed",
            Self::Timeout => "timed out",
            Self::Other => "network error",
        };
        f.write_str(name)
    }
}

/// A raw failure before classification.
#[derive(Error, Debug, Clone)]
pub enum TransportFailure {
    /// The request never produced a response.
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkFailureKind,
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP error: status={status}")]
    Status {
        status: u16,
        headers: HashMap<String, String>,
        body: Bytes,
    },

    /// Anything that happened outside the transport envelope.
    #[error("{message}")]
    Other { message: String },
}

impl TransportFailure {
    pub fn network(kind: NetworkFailureKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Turn a non-success response into a failure.
    pub fn from_response(response: Response) -> Self {
        Self::Status {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// Core transport trait: issue one request, get one response or a failure.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request. Non-success statuses are returned as `Ok`.
    async fn send(&self, request: Request) -> Result<Response, TransportFailure>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = Request::get("https://api.example.com/test")
            .header("Accept", "application/json")
            .query("limit", "10");

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "https://api.example.com/test");
        assert_eq!(request.header_value("accept"), Some("application/json"));
        assert_eq!(request.query, vec![("limit".to_string(), "10".to_string())]);
    }

    #[test]
    fn test_request_json() {
        #[derive(Serialize)]
        struct Payment {
            amount: u64,
        }

        let request = Request::post("https://api.example.com/payments")
            .json(&Payment { amount: 42 })
            .unwrap();

        assert_eq!(request.body.as_deref(), Some(&b"{\"amount\":42}"[..]));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn test_response_status_checks() {
        assert!(Response::new(RequestId::new(), 200, "OK").is_success());
        assert!(Response::new(RequestId::new(), 204, "").is_success());
        assert!(!Response::new(RequestId::new(), 404, "Not Found").is_success());
        assert!(!Response::new(RequestId::new(), 503, "").is_success());
    }

    #[test]
    fn test_empty_body_parses_as_null() {
        let response = Response::new(RequestId::new(), 204, "");
        let value: Option<u32> = response.json().unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_method_conversion() {
        let method: http::Method = Method::Patch.into();
        assert_eq!(method, http::Method::PATCH);
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert!(Method::Get.is_safe());
        assert!(!Method::Post.is_safe());
    }
}
