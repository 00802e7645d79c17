//! Idempotency key manager.
//!
//! Tracks mutating operations by key so that each key executes at most once:
//!
//! - a `pending` key rejects concurrent callers with
//!   [`IdempotencyError::InProgress`] instead of queueing them;
//! - a `completed` key returns the cached result until it expires;
//! - a `failed` or expired key may run again.
//!
//! All records live in one JSON object under a fixed storage key, so any
//! [`KeyValueStore`] can back the manager. Reads and writes of that object
//! happen under a short synchronous lock that is never held across an await.

mod key;
mod store;

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use self::{
    key::{DEFAULT_PREFIX, IdGenerator, UuidGenerator, context_hash, generate_key, parse_operation},
    store::{FileStore, KeyValueStore, MemoryStore, StoreError},
};
use crate::{
    error::{ApiError, ConfigError},
    metrics::ClientMetrics,
};

/// Errors from [`IdempotencyKeyManager`].
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Another call with the same key has not finished yet.
    #[error("Operation already in progress for idempotency key {key}")]
    InProgress { key: String },

    /// The wrapped operation failed.
    #[error(transparent)]
    Operation(#[from] ApiError),

    #[error("Idempotency storage error: {message}")]
    Storage { message: String },

    #[error("Idempotency serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for IdempotencyError {
    fn from(error: StoreError) -> Self {
        Self::Storage {
            message: error.to_string(),
        }
    }
}

impl IdempotencyError {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }
}

/// Wall clock used for record timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Lifecycle of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Pending,
    Completed,
    Failed,
}

/// Stored record for one key. Timestamps are milliseconds since the epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyKeyMetadata {
    pub key: String,
    pub operation: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: KeyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl IdempotencyKeyMetadata {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Manager settings.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub prefix: String,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    /// Key under which the record map is stored.
    pub storage_key: String,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            storage_key: "idempotency_keys".to_string(),
        }
    }
}

impl IdempotencyConfig {
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.prefix.is_empty() || self.prefix.contains('_') {
            return Err("Prefix must be non-empty and must not contain '_'".to_string());
        }
        if self.ttl.is_zero() {
            return Err("TTL must be > 0".to_string());
        }
        if self.cleanup_interval.is_zero() {
            return Err("Cleanup interval must be > 0".to_string());
        }
        if self.storage_key.is_empty() {
            return Err("Storage key must not be empty".to_string());
        }
        Ok(())
    }
}

type Records = HashMap<String, IdempotencyKeyMetadata>;

struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: IdempotencyConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    metrics: Option<ClientMetrics>,
    records: Mutex<()>,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup.get_mut().take() {
            task.token.cancel();
        }
    }
}

/// Guarantees at-most-once execution per key. Cloning shares state.
#[derive(Clone)]
pub struct IdempotencyKeyManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for IdempotencyKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyKeyManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum Begin {
    Started,
    Cached(Value),
}

/// Releases a pending record if the operation never reports back.
struct PendingGuard<'a> {
    manager: &'a IdempotencyKeyManager,
    key: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(key = %self.key, "Idempotent operation abandoned, marking failed");
            if let Err(e) = self
                .manager
                .mark_failed(self.key, ApiError::cancelled(self.key))
            {
                tracing::error!(key = %self.key, error = %e, "Failed to release pending key");
            }
        }
    }
}

impl IdempotencyKeyManager {
    /// In-memory manager with default settings.
    /// Manager with the default configuration and an in-memory store.
    pub fn new() -> Self {
        Self::builder().assemble()
    }

    pub fn builder() -> IdempotencyKeyManagerBuilder {
        IdempotencyKeyManagerBuilder::default()
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.inner.config
    }

    /// Generate a fresh key for `operation`.
    pub fn generate_key(&self, operation: &str, user_id: Option<&str>, context: &Value) -> String {
        generate_key(
            &self.inner.config.prefix,
            operation,
            user_id,
            context,
            self.inner.ids.as_ref(),
        )
    }

    /// Run `operation` at most once for `key`.
    pub async fn with_idempotency<T, F, Fut>(
        &self,
        key: &str,
        operation: F,
    ) -> Result<T, IdempotencyError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Begin::Cached(value) = self.begin(key)? {
            tracing::debug!(key = %key, "Returning cached idempotent result");
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_idempotency_hit();
            }
            return Ok(serde_json::from_value(value)?);
        }

        let mut guard = PendingGuard {
            manager: self,
            key,
            armed: true,
        };
        let outcome = operation().await;
        guard.disarm();

        match outcome {
            Ok(value) => match serde_json::to_value(&value) {
                Ok(json) => {
                    self.mark_completed(key, json)?;
                    Ok(value)
                }
                Err(e) => {
                    // The operation ran; never let it run again for this key.
                    self.mark_completed(key, Value::Null)?;
                    Err(e.into())
                }
            },
            Err(error) => {
                self.mark_failed(key, error.clone())?;
                Err(IdempotencyError::Operation(error))
            }
        }
    }

    fn begin(&self, key: &str) -> Result<Begin, IdempotencyError> {
        let now = self.now_ms();
        self.modify(|records| {
            if let Some(record) = records.get(key)
                && !record.is_expired_at(now)
            {
                match record.status {
                    KeyStatus::Pending => {
                        return Err(IdempotencyError::InProgress {
                            key: key.to_string(),
                        });
                    }
                    KeyStatus::Completed => {
                        return Ok((
                            false,
                            Begin::Cached(record.result.clone().unwrap_or(Value::Null)),
                        ));
                    }
                    KeyStatus::Failed => {}
                }
            }
            records.insert(key.to_string(), self.pending_record(key, now));
            Ok((true, Begin::Started))
        })
    }

    fn pending_record(&self, key: &str, now: u64) -> IdempotencyKeyMetadata {
        let ttl = u64::try_from(self.inner.config.ttl.as_millis()).unwrap_or(u64::MAX);
        IdempotencyKeyMetadata {
            key: key.to_string(),
            operation: parse_operation(&self.inner.config.prefix, key)
                .unwrap_or("unknown")
                .to_string(),
            created_at: now,
            expires_at: now.saturating_add(ttl),
            status: KeyStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Record for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<IdempotencyKeyMetadata>, IdempotencyError> {
        let _lock = self.inner.records.lock();
        Ok(self.load()?.remove(key))
    }

    /// Whether `key` is pending and not expired.
    pub fn is_pending(&self, key: &str) -> Result<bool, IdempotencyError> {
        let now = self.now_ms();
        Ok(self
            .get(key)?
            .is_some_and(|r| r.status == KeyStatus::Pending && !r.is_expired_at(now)))
    }

    /// Create or reset `key` as pending.
    pub fn mark_pending(&self, key: &str) -> Result<(), IdempotencyError> {
        let now = self.now_ms();
        self.modify(|records| {
            records.insert(key.to_string(), self.pending_record(key, now));
            Ok((true, ()))
        })
    }

    pub fn mark_completed(&self, key: &str, result: Value) -> Result<(), IdempotencyError> {
        self.finish(key, KeyStatus::Completed, Some(result), None)
    }

    pub fn mark_failed(&self, key: &str, error: ApiError) -> Result<(), IdempotencyError> {
        self.finish(key, KeyStatus::Failed, None, Some(error))
    }

    fn finish(
        &self,
        key: &str,
        status: KeyStatus,
        result: Option<Value>,
        error: Option<ApiError>,
    ) -> Result<(), IdempotencyError> {
        let now = self.now_ms();
        self.modify(|records| {
            let record = records
                .entry(key.to_string())
                .or_insert_with(|| self.pending_record(key, now));
            record.status = status;
            record.result = result;
            record.error = error;
            Ok((true, ()))
        })
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, IdempotencyError> {
        self.modify(|records| {
            let removed = records.remove(key).is_some();
            Ok((removed, removed))
        })
    }

    /// Remove every record.
    pub fn clear(&self) -> Result<(), IdempotencyError> {
        let _lock = self.inner.records.lock();
        self.inner.store.remove(&self.inner.config.storage_key)?;
        Ok(())
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> Result<usize, IdempotencyError> {
        let _lock = self.inner.records.lock();
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, IdempotencyError> {
        Ok(self.len()? == 0)
    }

    /// Drop expired records. Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize, IdempotencyError> {
        let now = self.now_ms();
        let removed = self.modify(|records| {
            let before = records.len();
            records.retain(|_, record| !record.is_expired_at(now));
            let removed = before - records.len();
            Ok((removed > 0, removed))
        })?;
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired idempotency keys");
        }
        Ok(removed)
    }

    /// Start the periodic cleanup task. Replaces a running one.
    pub fn start_cleanup(&self) {
        let interval = self.inner.config.cleanup_interval;
        let token = CancellationToken::new();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let manager = IdempotencyKeyManager { inner };
                        if let Err(e) = manager.cleanup() {
                            tracing::warn!(error = %e, "Idempotency cleanup failed");
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.inner.cleanup.lock().replace(CleanupTask { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Stop the periodic cleanup task and wait for it to exit.
    pub async fn stop_cleanup(&self) {
        let task = self.inner.cleanup.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            let _ = task.handle.await;
        }
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.inner
            .cleanup
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn now_ms(&self) -> u64 {
        let since = self
            .inner
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(since.as_millis()).unwrap_or(u64::MAX)
    }

    fn load(&self) -> Result<Records, IdempotencyError> {
        match self.inner.store.get(&self.inner.config.storage_key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Records::new()),
        }
    }

    fn save(&self, records: &Records) -> Result<(), IdempotencyError> {
        let key = &self.inner.config.storage_key;
        if records.is_empty() {
            self.inner.store.remove(key)?;
        } else {
            self.inner.store.set(key, serde_json::to_string(records)?)?;
        }
        Ok(())
    }

    /// Read-modify-write under the record lock. `f` returns whether to save.
    fn modify<R>(
        &self,
        f: impl FnOnce(&mut Records) -> Result<(bool, R), IdempotencyError>,
    ) -> Result<R, IdempotencyError> {
        let _lock = self.inner.records.lock();
        let mut records = self.load()?;
        let (dirty, out) = f(&mut records)?;
        if dirty {
            self.save(&records)?;
        }
        Ok(out)
    }
}

impl Default for IdempotencyKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`IdempotencyKeyManager`].
#[derive(Default)]
pub struct IdempotencyKeyManagerBuilder {
    config: IdempotencyConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    metrics: Option<ClientMetrics>,
}

impl IdempotencyKeyManagerBuilder {
    #[must_use]
    pub fn config(mut self, config: IdempotencyConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: impl KeyValueStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    #[must_use]
    pub fn id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<IdempotencyKeyManager, ConfigError> {
        self.config.validate().map_err(ConfigError::invalid)?;
        Ok(self.assemble())
    }

    fn assemble(self) -> IdempotencyKeyManager {
        IdempotencyKeyManager {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                ids: self.ids.unwrap_or_else(|| Arc::new(UuidGenerator)),
                metrics: self.metrics,
                records: Mutex::new(()),
                cleanup: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::error::ErrorCategory;

    /// Clock advanced by hand.
    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_000 + self.0.load(Ordering::SeqCst))
        }
    }

    fn manager(clock: &ManualClock) -> IdempotencyKeyManager {
        IdempotencyKeyManager::builder()
            .config(IdempotencyConfig::default().ttl(Duration::from_secs(60)))
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_result_is_cached() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let calls = &AtomicUsize::new(0);
        let key = "idem_payment_abc12345_uuid1";

        for _ in 0..2 {
            let value: u32 = manager
                .with_idempotency(key, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = manager.get(key).unwrap().unwrap();
        assert_eq!(record.status, KeyStatus::Completed);
        assert_eq!(record.operation, "payment");
        assert_eq!(record.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_expired_record_reexecutes() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let calls = &AtomicUsize::new(0);
        let key = "idem_payment_abc12345_uuid1";

        let run = || {
            manager.with_idempotency(key, move || async move {
                Ok::<_, ApiError>(calls.fetch_add(1, Ordering::SeqCst))
            })
        };

        assert_eq!(run().await.unwrap(), 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(run().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_call_fails_fast() {
        let manager = IdempotencyKeyManager::new();
        let key = "idem_payment_abc12345_uuid1";
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let first = manager.with_idempotency(key, || async move {
            let _ = wait.await;
            Ok::<_, ApiError>("paid".to_string())
        });
        let second = async {
            tokio::task::yield_now().await;
            assert!(manager.is_pending(key).unwrap());
            let result = manager
                .with_idempotency(key, || async { Ok::<_, ApiError>("again".to_string()) })
                .await;
            let _ = release.send(());
            result
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), "paid");
        assert!(second.unwrap_err().is_in_progress());
    }

    #[tokio::test]
    async fn test_failed_record_allows_retry() {
        let manager = IdempotencyKeyManager::new();
        let key = "idem_refund_abc12345_uuid1";

        let failed: Result<u32, _> = manager
            .with_idempotency(key, || async {
                Err(ApiError::new(ErrorCategory::Server, "down"))
            })
            .await;
        assert!(matches!(failed, Err(IdempotencyError::Operation(_))));
        let record = manager.get(key).unwrap().unwrap();
        assert_eq!(record.status, KeyStatus::Failed);
        assert_eq!(record.error.map(|e| e.message), Some("down".to_string()));

        let ok: u32 = manager
            .with_idempotency(key, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_abandoned_operation_releases_key() {
        let manager = IdempotencyKeyManager::new();
        let key = "idem_payment_abc12345_uuid1";

        let pending = manager.with_idempotency(key, || async {
            std::future::pending::<Result<u32, ApiError>>().await
        });
        let _ = tokio::time::timeout(Duration::from_millis(5), pending).await;

        let record = manager.get(key).unwrap().unwrap();
        assert_eq!(record.status, KeyStatus::Failed);
        assert!(!manager.is_pending(key).unwrap());
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let clock = ManualClock::default();
        let manager = manager(&clock);

        manager.mark_pending("idem_a_abc12345_1").unwrap();
        clock.advance(Duration::from_secs(30));
        manager
            .mark_completed("idem_b_abc12345_2", json!({"ok": true}))
            .unwrap();
        clock.advance(Duration::from_secs(31));

        assert_eq!(manager.cleanup().unwrap(), 1);
        assert!(manager.get("idem_a_abc12345_1").unwrap().is_none());
        assert!(manager.get("idem_b_abc12345_2").unwrap().is_some());
        assert_eq!(manager.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let manager = IdempotencyKeyManager::new();
        manager.mark_pending("idem_a_abc12345_1").unwrap();
        manager.mark_pending("idem_b_abc12345_2").unwrap();

        assert!(manager.delete("idem_a_abc12345_1").unwrap());
        assert!(!manager.delete("idem_a_abc12345_1").unwrap());
        manager.clear().unwrap();
        assert!(manager.is_empty().unwrap());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = IdempotencyKeyManager::builder()
            .config(IdempotencyConfig::default().prefix("idem_v2"))
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = IdempotencyKeyManager::builder()
            .config(IdempotencyConfig::default().ttl(Duration::ZERO))
            .build();
        assert!(result.is_err());

        let manager = IdempotencyKeyManager::builder()
            .config(IdempotencyConfig::default().prefix("op"))
            .build()
            .unwrap();
        let key = manager.generate_key("refund", None, &Value::Null);
        assert_eq!(parse_operation("op", &key), Some("refund"));
    }

    #[test]
    fn test_records_share_one_storage_key() {
        let store = Arc::new(MemoryStore::new());
        let manager = IdempotencyKeyManager::builder()
            .shared_store(store.clone())
            .build()
            .unwrap();
        manager.mark_pending("idem_a_abc12345_1").unwrap();
        manager.mark_pending("idem_b_abc12345_2").unwrap();

        let raw = store.get("idempotency_keys").unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.as_object().map(|m| m.len()), Some(2));
        assert_eq!(parsed["idem_a_abc12345_1"]["status"], "pending");
        assert!(parsed["idem_a_abc12345_1"]["expiresAt"].is_u64());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cleanup_task() {
        let clock = ManualClock::default();
        let manager = IdempotencyKeyManager::builder()
            .config(
                IdempotencyConfig::default()
                    .ttl(Duration::from_secs(1))
                    .cleanup_interval(Duration::from_secs(10)),
            )
            .clock(clock.clone())
            .build()
            .unwrap();
        manager.mark_pending("idem_a_abc12345_1").unwrap();
        clock.advance(Duration::from_secs(5));

        manager.start_cleanup();
        assert!(manager.is_cleanup_running());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(manager.is_empty().unwrap());

        manager.stop_cleanup().await;
        assert!(!manager.is_cleanup_running());
    }
}
