//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one underlying future.
//! The entry is removed as soon as that future settles, or when every caller
//! has given up on it, so a later call with the same key always starts a fresh
//! operation.

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use scc::hash_map::Entry;
use url::Url;

use crate::{error::ApiError, transport::Method};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, ApiError>>>;
type InFlightMap<T> = scc::HashMap<String, InFlight<T>>;

struct InFlight<T> {
    id: u64,
    waiters: Weak<Waiters<T>>,
}

/// Held by every caller joined to one operation.
///
/// When the last caller lets go, settled or not, the entry is removed and the
/// operation is dropped with it.
struct Waiters<T> {
    id: u64,
    key: String,
    shared: SharedResult<T>,
    in_flight: Arc<InFlightMap<T>>,
}

impl<T> Drop for Waiters<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.in_flight.remove_if_sync(&self.key, |entry| entry.id == id);
    }
}

/// Collapses concurrent identical operations into one.
pub struct RequestDeduplicator<T> {
    in_flight: Arc<InFlightMap<T>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for RequestDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(scc::HashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> std::fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight operation for `key`, or start `operation` and
    /// register it under `key` until it settles.
    ///
    /// If every caller drops its future first, the operation is dropped too
    /// and the next caller starts afresh.
    pub async fn get_or_execute<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let key = key.into();
        let waiters = match self.in_flight.entry_sync(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get().waiters.upgrade() {
                Some(waiters) => {
                    tracing::debug!(key = %key, "Joining in-flight request");
                    waiters
                }
                // The last waiter is being dropped right now.
                None => {
                    let (waiters, record) = self.start(key, operation);
                    entry.insert(record);
                    waiters
                }
            },
            Entry::Vacant(entry) => {
                let (waiters, record) = self.start(key, operation);
                entry.insert_entry(record);
                waiters
            }
        };

        waiters.shared.clone().await
    }

    fn start<F, Fut>(&self, key: String, operation: F) -> (Arc<Waiters<T>>, InFlight<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let in_flight = Arc::clone(&self.in_flight);
        let cleanup_key = key.clone();
        let future = operation();
        let shared = async move {
            let result = future.await;
            in_flight.remove_if_sync(&cleanup_key, |entry| entry.id == id);
            result
        }
        .boxed()
        .shared();

        let waiters = Arc::new(Waiters {
            id,
            key,
            shared,
            in_flight: Arc::clone(&self.in_flight),
        });
        let record = InFlight {
            id,
            waiters: Arc::downgrade(&waiters),
        };
        (waiters, record)
    }

    /// Number of operations currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Whether an operation for `key` is in flight.
    pub fn contains(&self, key: &str) -> bool {
        self.in_flight.contains_sync(key)
    }
}

/// Build a deduplication key from method, URL and query parameters.
///
/// The URL is normalized (scheme/host case, fragment dropped, query pairs
/// sorted) and merged with `params`, so parameter order never matters.
pub fn dedup_key(method: Method, url: &str, params: &BTreeMap<String, String>) -> String {
    let mut query: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let base = match Url::parse(url) {
        Ok(mut parsed) => {
            query.extend(
                parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => {
            let trimmed = url.split('#').next().unwrap_or(url);
            match trimmed.split_once('?') {
                Some((path, raw)) => {
                    query.extend(raw.split('&').filter(|p| !p.is_empty()).map(|pair| {
                        match pair.split_once('=') {
                            Some((k, v)) => (k.to_string(), v.to_string()),
                            None => (pair.to_string(), String::new()),
                        }
                    }));
                    path.to_string()
                }
                None => trimmed.to_string(),
            }
        }
    };

    query.sort();
    let serialized = serde_json::to_string(&query).unwrap_or_default();
    format!("{method}:{base}:{serialized}")
}
