//! Retry executor with exponential backoff.

use std::{collections::HashSet, fmt, future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    backoff::{BackoffConfig, calculate_backoff},
    error::{ApiError, ErrorCategory},
};

/// Callback invoked before each retry with `(error, attempt, delay)`.
///
/// `attempt` is the 1-indexed number of the retry about to happen.
pub type RetryObserver = Arc<dyn Fn(&ApiError, u32, Duration) + Send + Sync>;

/// Retry policy.
#[derive(Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt. `0` means exactly one attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_categories: HashSet<ErrorCategory>,
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_categories: [ErrorCategory::Network, ErrorCategory::Server]
                .into_iter()
                .collect(),
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retryable_categories", &self.retryable_categories)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn retryable_categories(
        mut self,
        categories: impl IntoIterator<Item = ErrorCategory>,
    ) -> Self {
        self.retryable_categories = categories.into_iter().collect();
        self
    }

    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ApiError, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.backoff().validate()
    }

    fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            factor: self.backoff_multiplier,
            jitter: 0.0,
        }
    }

    /// Delay before the `retry`-th retry (1-indexed):
    /// `min(initial * multiplier^(retry - 1), max)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        calculate_backoff(self.backoff(), retry.saturating_sub(1))
    }

    /// Whether `error` may be retried under this policy.
    pub fn allows(&self, error: &ApiError) -> bool {
        error.retryable && self.retryable_categories.contains(&error.category)
    }
}

/// Per-call partial overrides of [`RetryOptions`].
#[derive(Clone, Debug, Default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub retryable_categories: Option<HashSet<ErrorCategory>>,
}

impl RetryOverrides {
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    #[must_use]
    pub fn retryable_categories(
        mut self,
        categories: impl IntoIterator<Item = ErrorCategory>,
    ) -> Self {
        self.retryable_categories = Some(categories.into_iter().collect());
        self
    }

    /// Merge onto `base`, keeping `base`'s observer.
    pub fn apply(&self, base: &RetryOptions) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_delay: self.initial_delay.unwrap_or(base.initial_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            retryable_categories: self
                .retryable_categories
                .clone()
                .unwrap_or_else(|| base.retryable_categories.clone()),
            on_retry: base.on_retry.clone(),
        }
    }
}

/// Re-invokes an operation on retryable failures.
#[derive(Clone, Debug, Default)]
pub struct RetryExecutor {
    options: RetryOptions,
}

impl RetryExecutor {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Run `operation` until it succeeds, fails terminally or the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        self.run_with_gate(operation, |_, _| async { true }).await
    }

    /// Like [`run`](Self::run), but `gate` is consulted before each retry
    /// and may veto it by returning `false`.
    pub async fn run_with_gate<T, E, F, Fut, G, GFut>(
        &self,
        mut operation: F,
        mut gate: G,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
        G: FnMut(ApiError, u32) -> GFut,
        GFut: Future<Output = bool>,
    {
        let options = &self.options;
        let mut attempt: u32 = 0;

        loop {
            let error: ApiError = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e.into(),
            };

            if attempt >= options.max_retries || !options.allows(&error) {
                return Err(error);
            }

            attempt += 1;
            if !gate(error.clone(), attempt).await {
                tracing::debug!(attempt, error = %error, "Retry vetoed");
                return Err(error);
            }

            let delay = options.delay_for_retry(attempt);
            tracing::info!(
                attempt,
                max_retries = options.max_retries,
                delay_ms = delay.as_millis() as u64,
                category = %error.category,
                error = %error,
                "Retrying request"
            );
            if let Some(observer) = &options.on_retry {
                observer(&error, attempt, delay);
            }

            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    fn server_error() -> ApiError {
        ApiError::new(ErrorCategory::Server, "unavailable").with_status(503)
    }

    #[test]
    fn test_delay_schedule() {
        let options = RetryOptions::default();
        assert_eq!(options.delay_for_retry(1), Duration::from_millis(1000));
        assert_eq!(options.delay_for_retry(2), Duration::from_millis(2000));
        assert_eq!(options.delay_for_retry(3), Duration::from_millis(4000));
        assert_eq!(options.delay_for_retry(5), Duration::from_millis(10_000));
    }

    #[test]
    fn test_overrides_merge() {
        let base = RetryOptions::default().on_retry(|_, _, _| {});
        let merged = RetryOverrides::default()
            .max_retries(1)
            .retryable_categories([ErrorCategory::Network])
            .apply(&base);

        assert_eq!(merged.max_retries, 1);
        assert_eq!(merged.initial_delay, base.initial_delay);
        assert!(!merged.retryable_categories.contains(&ErrorCategory::Server));
        assert!(merged.on_retry.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::default());
        let start = Instant::now();

        let result: Result<&str, ApiError> = executor
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::default());
        let start = Instant::now();

        let result: Result<(), ApiError> = executor
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(ErrorCategory::Validation, "bad input"))
            })
            .await;

        assert_eq!(result.unwrap_err().category, ErrorCategory::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_one_attempt() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::none());

        let result: Result<(), ApiError> = executor
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_and_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let options = RetryOptions::default()
            .max_retries(4)
            .on_retry(move |_, attempt, delay| {
                recorder.lock().unwrap().push((attempt, delay.as_millis() as u64));
            });
        let calls = &AtomicU32::new(0);

        let result: Result<(), ApiError> = RetryExecutor::new(options)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::network("refused"))
            })
            .await;

        assert_eq!(result.unwrap_err().category, ErrorCategory::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 1000), (2, 2000), (3, 4000), (4, 8000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_outside_set_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let options = RetryOptions::default().retryable_categories([ErrorCategory::Network]);

        let result: Result<(), ApiError> = RetryExecutor::new(options)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_can_veto() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::default());

        let result: Result<(), ApiError> = executor
            .run_with_gate(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                },
                |_, attempt| async move { attempt < 2 },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
