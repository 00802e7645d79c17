//! Per-request cancellation handles keyed by `METHOD:url`.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::transport::Method;

/// Registry key for a call.
pub fn cancel_key(method: Method, url: &str) -> String {
    format!("{method}:{url}")
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>,
}

/// Tracks cancellation tokens of outstanding calls.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Registry>,
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new call under `key`. The entry lives as long as the handle.
    pub fn register(&self, key: impl Into<String>) -> CancelHandle {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner
            .entries
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, token.clone()));
        CancelHandle {
            registry: Arc::clone(&self.inner),
            key,
            id,
            token,
        }
    }

    /// Cancel every call tracked under `key`. Returns how many were cancelled.
    pub fn cancel(&self, key: &str) -> usize {
        let tokens = self.inner.entries.lock().remove(key).unwrap_or_default();
        for (_, token) in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Cancel everything currently tracked.
    pub fn cancel_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.inner.entries.lock());
        let mut cancelled = 0;
        for (_, token) in entries.into_values().flatten() {
            token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Number of tracked calls.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped registration; dropping it forgets the call.
pub struct CancelHandle {
    registry: Arc<Registry>,
    key: String,
    id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let mut entries = self.registry.entries.lock();
        if let Some(tokens) = entries.get_mut(&self.key) {
            tokens.retain(|(id, _)| *id != self.id);
            if tokens.is_empty() {
                entries.remove(&self.key);
            }
        }
    }
}
