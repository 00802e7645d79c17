use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::time::Instant;

use super::{
    cancel::{CancellationRegistry, cancel_key},
    config::{HttpConfig, IDEMPOTENCY_KEY_HEADER, RequestConfig},
};
use crate::{
    auth::{BearerAuthHook, CredentialSource},
    classify::{classify, classify_other},
    config::resolve_url,
    dedup::{RequestDeduplicator, dedup_key},
    error::{ApiError, ApiResult, ConfigError, ErrorCategory, ErrorSeverity},
    hooks::Hooks,
    metrics::ClientMetrics,
    retry::{RetryExecutor, RetryOptions},
    transport::{Method, Request, Response, Transport, TransportFailure},
};

struct ClientInner<T> {
    transport: Arc<T>,
    config: HttpConfig,
    hooks: Hooks,
    dedup: RequestDeduplicator<Response>,
    cancels: CancellationRegistry,
    metrics: ClientMetrics,
}

/// HTTP façade: interceptors, deduplication, retry, timeouts and
/// cancellation around a [`Transport`].
///
/// Cloning shares the deduplicator, cancellation handles and hooks.
pub struct HttpClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for HttpClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("transport", &self.inner.transport.name())
            .field("base_url", &self.inner.config.base_url)
            .field("hooks", &self.inner.hooks)
            .field("in_flight", &self.inner.dedup.len())
            .field("pending", &self.inner.cancels.len())
            .finish()
    }
}

impl<T: Transport> HttpClient<T> {
    /// Client with `config` and no hooks.
    pub fn new(transport: T, config: HttpConfig) -> Result<Self, ConfigError> {
        Self::builder(transport).config(config).build()
    }

    pub fn builder(transport: T) -> HttpClientBuilder<T> {
        HttpClientBuilder {
            transport,
            config: HttpConfig::default(),
            hooks: Hooks::new(),
            credential: None,
            metrics: None,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub async fn get<R>(&self, path: &str, config: RequestConfig) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request::<(), R>(Method::Get, path, None, config).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B, config: RequestConfig) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(Method::Post, path, Some(body), config).await
    }

    pub async fn put<B, R>(&self, path: &str, body: &B, config: RequestConfig) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(Method::Put, path, Some(body), config).await
    }

    pub async fn patch<B, R>(&self, path: &str, body: &B, config: RequestConfig) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(Method::Patch, path, Some(body), config).await
    }

    pub async fn delete<R>(&self, path: &str, config: RequestConfig) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request::<(), R>(Method::Delete, path, None, config).await
    }

    /// Issue a request and parse the JSON response body.
    ///
    /// A body that serializes to `null` is not sent.
    pub async fn request<B, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        config: RequestConfig,
    ) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(method, path, body, config).await?;
        response.json::<R>().map_err(|e| {
            let error = classify_other(format!("Failed to parse response body: {e}"))
                .with_status(response.status);
            self.log_error(method, path, &error);
            self.inner.metrics.record_error(&error);
            error
        })
    }

    /// Issue a request and return the raw response.
    pub async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        config: RequestConfig,
    ) -> ApiResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let template = self.build_request(method, path, body, &config)?;
        let options = config.retry_options(&self.inner.config.retry);
        options.validate().map_err(|e| {
            ApiError::new(ErrorCategory::Client, format!("Invalid retry options: {e}"))
                .with_retryable(false)
        })?;
        let timeout = config.timeout.unwrap_or(self.inner.config.timeout);

        let dedup = method.is_safe() && self.inner.config.dedup_enabled && !config.skip_dedup;
        if !dedup {
            return self.execute(template, options, timeout).await;
        }

        let key = dedup_key(method, &template.url, &config.params);
        if self.inner.dedup.contains(&key) {
            self.inner.metrics.record_dedup_join();
        }
        let this = self.clone();
        self.inner
            .dedup
            .get_or_execute(key, move || async move {
                this.execute(template, options, timeout).await
            })
            .await
    }

    /// Abort outstanding calls for `method` and `path`. Returns how many were aborted.
    pub fn cancel_request(&self, method: Method, path: &str) -> usize {
        let url = resolve_url(&self.inner.config.base_url, path).unwrap_or_else(|_| path.to_string());
        let cancelled = self.inner.cancels.cancel(&cancel_key(method, &url));
        tracing::debug!(method = %method, url = %url, cancelled, "Cancelled request");
        cancelled
    }

    /// Abort every outstanding call.
    pub fn cancel_all_requests(&self) -> usize {
        let cancelled = self.inner.cancels.cancel_all();
        tracing::debug!(cancelled, "Cancelled all requests");
        cancelled
    }

    /// Distinct deduplicated GETs currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.dedup.len()
    }

    /// Calls holding a cancellation handle.
    pub fn pending_requests(&self) -> usize {
        self.inner.cancels.len()
    }

    fn build_request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        config: &RequestConfig,
    ) -> ApiResult<Request>
    where
        B: Serialize + ?Sized,
    {
        let url = resolve_url(&self.inner.config.base_url, path).map_err(|e| {
            ApiError::new(ErrorCategory::Client, e.to_string()).with_retryable(false)
        })?;

        let mut request = Request::new(method, url);
        for (name, value) in &self.inner.config.default_headers {
            request.headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &config.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        if let Some(key) = &config.idempotency_key {
            request
                .headers
                .insert(IDEMPOTENCY_KEY_HEADER.to_string(), key.clone());
        }
        request.query = config
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(body) = body {
            let value = serde_json::to_value(body).map_err(|e| {
                classify_other(format!("Failed to serialize request body: {e}"))
            })?;
            if !value.is_null() {
                request = request.json(&value).map_err(|e| {
                    classify_other(format!("Failed to serialize request body: {e}"))
                })?;
            }
        }
        Ok(request)
    }

    /// Retry loop under a cancellation handle, with error interception.
    async fn execute(
        &self,
        template: Request,
        options: RetryOptions,
        timeout: Duration,
    ) -> ApiResult<Response> {
        let key = cancel_key(template.method, &template.url);
        let handle = self.inner.cancels.register(key.clone());

        let result = tokio::select! {
            biased;
            _ = handle.token().cancelled() => Err(ApiError::cancelled(&key)),
            result = self.run_with_retry(&template, options, timeout) => result,
        };
        drop(handle);

        if let Err(error) = &result {
            self.log_error(template.method, &template.url, error);
            self.inner.metrics.record_error(error);
            self.inner.hooks.run_on_error(&template, error).await;
        }
        result
    }

    async fn run_with_retry(
        &self,
        template: &Request,
        options: RetryOptions,
        timeout: Duration,
    ) -> ApiResult<Response> {
        let executor = RetryExecutor::new(options);
        executor
            .run_with_gate(
                || self.attempt(template.clone(), timeout),
                |error, attempt| {
                    let delay = executor.options().delay_for_retry(attempt);
                    async move {
                        self.inner.metrics.record_retry(&error);
                        match self
                            .inner
                            .hooks
                            .run_before_retry(template, &error, attempt, delay)
                            .await
                        {
                            Ok(proceed) => proceed,
                            Err(e) => {
                                tracing::warn!(error = %e, "before_retry hook failed, not retrying");
                                false
                            }
                        }
                    }
                },
            )
            .await
    }

    /// One transport round-trip.
    async fn attempt(&self, mut request: Request, timeout: Duration) -> ApiResult<Response> {
        self.inner.hooks.run_before_request(&mut request).await?;
        self.inner.metrics.record_request(request.method);

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.inner.transport.send(request.clone())).await;
        let mut response = match outcome {
            Err(_) => return Err(ApiError::timeout(timeout)),
            Ok(Err(failure)) => return Err(classify(&failure)),
            Ok(Ok(response)) => response.with_duration(started.elapsed()),
        };

        if !response.is_success() {
            return Err(classify(&TransportFailure::from_response(response)));
        }

        self.inner
            .hooks
            .run_after_response(&request, &mut response)
            .await?;
        self.inner
            .metrics
            .record_success(response.status, response.duration);
        Ok(response)
    }

    fn log_error(&self, method: Method, url: &str, error: &ApiError) {
        let status = error.status_code;
        match error.severity {
            ErrorSeverity::Info => tracing::info!(
                method = %method,
                url = %url,
                category = %error.category,
                severity = %error.severity,
                status,
                error = %error.message,
                "Request failed"
            ),
            ErrorSeverity::Warning => tracing::warn!(
                method = %method,
                url = %url,
                category = %error.category,
                severity = %error.severity,
                status,
                error = %error.message,
                "Request failed"
            ),
            ErrorSeverity::Error | ErrorSeverity::Critical => tracing::error!(
                method = %method,
                url = %url,
                category = %error.category,
                severity = %error.severity,
                status,
                error = %error.message,
                "Request failed"
            ),
        }
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder<T> {
    transport: T,
    config: HttpConfig,
    hooks: Hooks,
    credential: Option<Arc<dyn CredentialSource>>,
    metrics: Option<ClientMetrics>,
}

impl<T: Transport> HttpClientBuilder<T> {
    #[must_use]
    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attach `Authorization: Bearer` from `source` to every request.
    #[must_use]
    pub fn credential(mut self, source: impl CredentialSource + 'static) -> Self {
        self.credential = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<HttpClient<T>, ConfigError> {
        self.config.validate()?;

        let mut hooks = self.hooks;
        if let Some(source) = self.credential {
            hooks
                .before_request
                .insert(0, Arc::new(BearerAuthHook::new(source)));
        }

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                transport: Arc::new(self.transport),
                config: self.config,
                hooks,
                dedup: RequestDeduplicator::new(),
                cancels: CancellationRegistry::new(),
                metrics: self.metrics.unwrap_or_default(),
            }),
        })
    }
}
