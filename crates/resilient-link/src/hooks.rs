//! Request/response interceptors for the HTTP client.
//!
//! Hooks run in registration order at fixed points of a call:
//!
//! - [`BeforeRequestHook`] before every transport attempt (auth, headers);
//! - [`AfterResponseHook`] on every successful response (logging, transforms);
//! - [`BeforeRetryHook`] before a retry is scheduled; may veto it;
//! - [`OnErrorHook`] once per classified error surfaced to the caller.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::{ApiError, ErrorCategory},
    transport::{Request, Response},
};

/// Error type for hook operations.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Hook execution failed with a message.
    #[error("Hook failed: {message}")]
    Failed { message: String },

    /// A credential could not be obtained.
    #[error("Credential unavailable: {message}")]
    Credential { message: String },

    /// Custom error from hook implementation.
    #[error("Hook error: {0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    pub fn custom<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Custom(Box::new(error))
    }
}

impl From<HookError> for ApiError {
    fn from(error: HookError) -> Self {
        let category = match error {
            HookError::Credential { .. } => ErrorCategory::Authentication,
            _ => ErrorCategory::Unknown,
        };
        ApiError::new(category, error.to_string()).with_retryable(false)
    }
}

/// Hook executed before a request is sent.
#[async_trait]
pub trait BeforeRequestHook: Send + Sync {
    /// Called before each attempt. Can modify the request.
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError>;

    fn name(&self) -> &'static str {
        "before_request"
    }
}

/// Hook executed after a successful response is received.
#[async_trait]
pub trait AfterResponseHook: Send + Sync {
    /// Called with the raw response. Can rewrite it before it is parsed.
    async fn on_response(
        &self,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), HookError>;

    fn name(&self) -> &'static str {
        "after_response"
    }
}

/// Hook executed before a retry attempt.
#[async_trait]
pub trait BeforeRetryHook: Send + Sync {
    /// Return `false` to stop retrying and surface `error`.
    async fn on_retry(
        &self,
        request: &Request,
        error: &ApiError,
        attempt: u32,
        delay: Duration,
    ) -> Result<bool, HookError>;

    fn name(&self) -> &'static str {
        "before_retry"
    }
}

/// Hook executed when a classified error is about to be surfaced.
#[async_trait]
pub trait OnErrorHook: Send + Sync {
    async fn on_error(&self, request: &Request, error: &ApiError) -> Result<(), HookError>;

    fn name(&self) -> &'static str {
        "on_error"
    }
}

/// Collection of hooks for the HTTP client lifecycle.
#[derive(Default, Clone)]
pub struct Hooks {
    pub before_request: Vec<Arc<dyn BeforeRequestHook>>,
    pub after_response: Vec<Arc<dyn AfterResponseHook>>,
    pub before_retry: Vec<Arc<dyn BeforeRetryHook>>,
    pub on_error: Vec<Arc<dyn OnErrorHook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request_count", &self.before_request.len())
            .field("after_response_count", &self.after_response.len())
            .field("before_retry_count", &self.before_retry.len())
            .field("on_error_count", &self.on_error.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before_request<H: BeforeRequestHook + 'static>(mut self, hook: H) -> Self {
        self.before_request.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after_response<H: AfterResponseHook + 'static>(mut self, hook: H) -> Self {
        self.after_response.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn before_retry<H: BeforeRetryHook + 'static>(mut self, hook: H) -> Self {
        self.before_retry.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_error<H: OnErrorHook + 'static>(mut self, hook: H) -> Self {
        self.on_error.push(Arc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty()
            && self.after_response.is_empty()
            && self.before_retry.is_empty()
            && self.on_error.is_empty()
    }

    pub async fn run_before_request(&self, request: &mut Request) -> Result<(), HookError> {
        for hook in &self.before_request {
            tracing::trace!(hook = hook.name(), "Running before_request hook");
            hook.on_request(request).await?;
        }
        Ok(())
    }

    pub async fn run_after_response(
        &self,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), HookError> {
        for hook in &self.after_response {
            tracing::trace!(hook = hook.name(), "Running after_response hook");
            hook.on_response(request, response).await?;
        }
        Ok(())
    }

    /// Returns `true` if every hook agrees to retry.
    pub async fn run_before_retry(
        &self,
        request: &Request,
        error: &ApiError,
        attempt: u32,
        delay: Duration,
    ) -> Result<bool, HookError> {
        for hook in &self.before_retry {
            tracing::trace!(hook = hook.name(), attempt, "Running before_retry hook");
            if !hook.on_retry(request, error, attempt, delay).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs every on-error hook; hook failures are logged, not propagated.
    pub async fn run_on_error(&self, request: &Request, error: &ApiError) {
        for hook in &self.on_error {
            tracing::trace!(hook = hook.name(), %error, "Running on_error hook");
            if let Err(e) = hook.on_error(request, error).await {
                tracing::warn!(hook = hook.name(), error = %e, "on_error hook failed");
            }
        }
    }
}

/// Logs requests and responses at a fixed level.
pub struct LoggingHook {
    level: tracing::Level,
}

impl LoggingHook {
    pub fn new(level: tracing::Level) -> Self {
        Self { level }
    }

    pub fn info() -> Self {
        Self::new(tracing::Level::INFO)
    }

    pub fn debug() -> Self {
        Self::new(tracing::Level::DEBUG)
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::info()
    }
}

#[async_trait]
impl BeforeRequestHook for LoggingHook {
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError> {
        match self.level {
            tracing::Level::ERROR | tracing::Level::WARN => {
                tracing::warn!(method = %request.method, url = %request.url, "Sending request");
            }
            tracing::Level::INFO => {
                tracing::info!(method = %request.method, url = %request.url, "Sending request");
            }
            _ => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    query = ?request.query,
                    body_len = request.body.as_ref().map_or(0, |b| b.len()),
                    "Sending request"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[async_trait]
impl AfterResponseHook for LoggingHook {
    async fn on_response(
        &self,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), HookError> {
        let duration_ms = response.duration.as_millis() as u64;
        match self.level {
            tracing::Level::ERROR | tracing::Level::WARN => {
                tracing::warn!(method = %request.method, url = %request.url, status = response.status, duration_ms, "Received response");
            }
            tracing::Level::INFO => {
                tracing::info!(method = %request.method, url = %request.url, status = response.status, duration_ms, "Received response");
            }
            _ => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    duration_ms,
                    headers = ?response.headers,
                    body_len = response.body.len(),
                    "Received response"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Injects fixed headers into requests.
#[derive(Default)]
pub struct HeaderInjectionHook {
    headers: Vec<(String, String)>,
}

impl HeaderInjectionHook {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.push((name.into(), value.into()));
        }
        self
    }
}

#[async_trait]
impl BeforeRequestHook for HeaderInjectionHook {
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError> {
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "header_injection"
    }
}

/// Adds the request id as a header.
pub struct RequestIdHook {
    header_name: String,
}

impl RequestIdHook {
    /// Uses `X-Request-ID`.
    pub fn new() -> Self {
        Self::with_header_name("X-Request-ID")
    }

    pub fn with_header_name(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl Default for RequestIdHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BeforeRequestHook for RequestIdHook {
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError> {
        request
            .headers
            .insert(self.header_name.clone(), request.id.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "request_id"
    }
}

/// Closure-based before-request hook.
pub struct FnBeforeRequestHook<F>
where
    F: Fn(&mut Request) -> Result<(), HookError> + Send + Sync,
{
    f: F,
    name: &'static str,
}

impl<F> FnBeforeRequestHook<F>
where
    F: Fn(&mut Request) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { f, name }
    }
}

#[async_trait]
impl<F> BeforeRequestHook for FnBeforeRequestHook<F>
where
    F: Fn(&mut Request) -> Result<(), HookError> + Send + Sync,
{
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError> {
        (self.f)(request)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Closure-based after-response hook, typically a body transform.
pub struct FnAfterResponseHook<F>
where
    F: Fn(&Request, &mut Response) -> Result<(), HookError> + Send + Sync,
{
    f: F,
    name: &'static str,
}

impl<F> FnAfterResponseHook<F>
where
    F: Fn(&Request, &mut Response) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { f, name }
    }
}

#[async_trait]
impl<F> AfterResponseHook for FnAfterResponseHook<F>
where
    F: Fn(&Request, &mut Response) -> Result<(), HookError> + Send + Sync,
{
    async fn on_response(
        &self,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), HookError> {
        (self.f)(request, response)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::transport::RequestId;

    struct NeverRetry;

    #[async_trait]
    impl BeforeRetryHook for NeverRetry {
        async fn on_retry(
            &self,
            _request: &Request,
            _error: &ApiError,
            _attempt: u32,
            _delay: Duration,
        ) -> Result<bool, HookError> {
            Ok(false)
        }
    }

    #[test]
    fn test_hooks_builder() {
        let hooks = Hooks::new()
            .before_request(LoggingHook::info())
            .after_response(LoggingHook::info())
            .before_request(RequestIdHook::new());

        assert_eq!(hooks.before_request.len(), 2);
        assert_eq!(hooks.after_response.len(), 1);
        assert!(!hooks.is_empty());
        assert!(Hooks::new().is_empty());
    }

    #[tokio::test]
    async fn test_header_injection_hook() {
        let hook = HeaderInjectionHook::new()
            .header("X-Custom", "value")
            .headers([("X-Tenant", "acme")]);

        let mut request = Request::get("https://example.com/api");
        hook.on_request(&mut request).await.unwrap();

        assert_eq!(request.header_value("x-custom"), Some("value"));
        assert_eq!(request.header_value("X-Tenant"), Some("acme"));
    }

    #[tokio::test]
    async fn test_request_id_hook() {
        let hook = RequestIdHook::new();
        let mut request = Request::get("https://example.com/api");
        let request_id = request.id.to_string();

        hook.on_request(&mut request).await.unwrap();

        assert_eq!(request.headers.get("X-Request-ID"), Some(&request_id));
    }

    #[tokio::test]
    async fn test_response_transform() {
        let hooks = Hooks::new().after_response(FnAfterResponseHook::new(
            "unwrap_data",
            |_req: &Request, res: &mut Response| {
                let value: serde_json::Value = res.json().map_err(HookError::custom)?;
                res.body = Bytes::from(value["data"].to_string());
                Ok(())
            },
        ));

        let request = Request::get("https://example.com/api");
        let mut response = Response::new(RequestId::new(), 200, r#"{"data":{"n":1}}"#);
        hooks
            .run_after_response(&request, &mut response)
            .await
            .unwrap();

        assert_eq!(response.text(), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_before_retry_veto() {
        let hooks = Hooks::new().before_retry(NeverRetry);
        let request = Request::get("https://example.com/api");
        let error = ApiError::network("refused");

        let proceed = hooks
            .run_before_retry(&request, &error, 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!proceed);
    }

    #[test]
    fn test_hook_error_classification() {
        let err: ApiError = HookError::credential("token expired").into();
        assert_eq!(err.category, ErrorCategory::Authentication);
        assert!(!err.retryable);

        let err: ApiError = HookError::failed("boom").into();
        assert_eq!(err.category, ErrorCategory::Unknown);
    }
}
