//! Counters for the HTTP client, idempotency manager and WebSocket session.
//!
//! Every counter is reported through the OpenTelemetry global meter and
//! mirrored in a local atomic so tests and dashboards can read it back
//! with [`ClientMetrics::snapshot`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

use crate::{error::ApiError, transport::Method};

const METER_NAME: &str = "resilient-link";

/// Point-in-time view of the local counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub retries: u64,
    pub dedup_joins: u64,
    pub idempotency_hits: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    dedup_joins: AtomicU64,
    idempotency_hits: AtomicU64,
    reconnects: AtomicU64,
}

/// Shared metrics handle. Cloning is cheap.
#[derive(Clone)]
pub struct ClientMetrics {
    counters: Arc<Counters>,
    otlp_requests: Counter<u64>,
    otlp_errors: Counter<u64>,
    otlp_retries: Counter<u64>,
    otlp_dedup_joins: Counter<u64>,
    otlp_idempotency_hits: Counter<u64>,
    otlp_reconnects: Counter<u64>,
    otlp_latency: Histogram<f64>,
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            counters: Arc::new(Counters::default()),
            otlp_requests: meter
                .u64_counter("link.http.requests")
                .with_description("Total number of HTTP requests issued")
                .build(),
            otlp_errors: meter
                .u64_counter("link.http.errors")
                .with_description("Classified HTTP errors surfaced to callers")
                .build(),
            otlp_retries: meter
                .u64_counter("link.http.retries")
                .with_description("Retries scheduled by the retry executor")
                .build(),
            otlp_dedup_joins: meter
                .u64_counter("link.http.dedup_joins")
                .with_description("Calls that joined an in-flight identical request")
                .build(),
            otlp_idempotency_hits: meter
                .u64_counter("link.idempotency.cache_hits")
                .with_description("Idempotent calls answered from a cached result")
                .build(),
            otlp_reconnects: meter
                .u64_counter("link.ws.reconnects")
                .with_description("WebSocket reconnect attempts")
                .build(),
            otlp_latency: meter
                .f64_histogram("link.http.duration")
                .with_unit("s")
                .with_description("HTTP transport round-trip time in seconds")
                .build(),
        }
    }

    pub fn record_request(&self, method: Method) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        self.otlp_requests
            .add(1, &[KeyValue::new("method", method.as_str())]);
    }

    pub fn record_success(&self, status: u16, duration: Duration) {
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        self.otlp_latency.record(
            duration.as_secs_f64(),
            &[KeyValue::new("status", i64::from(status))],
        );
    }

    pub fn record_error(&self, error: &ApiError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.otlp_errors.add(
            1,
            &[
                KeyValue::new("category", error.category.as_str()),
                KeyValue::new("severity", error.severity.as_str()),
            ],
        );
    }

    pub fn record_retry(&self, error: &ApiError) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
        self.otlp_retries
            .add(1, &[KeyValue::new("category", error.category.as_str())]);
    }

    pub fn record_dedup_join(&self) {
        self.counters.dedup_joins.fetch_add(1, Ordering::Relaxed);
        self.otlp_dedup_joins.add(1, &[]);
    }

    pub fn record_idempotency_hit(&self) {
        self.counters.idempotency_hits.fetch_add(1, Ordering::Relaxed);
        self.otlp_idempotency_hits.add(1, &[]);
    }

    pub fn record_reconnect(&self, attempt: u32) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        self.otlp_reconnects
            .add(1, &[KeyValue::new("attempt", i64::from(attempt))]);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            requests: c.requests.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            dedup_joins: c.dedup_joins.load(Ordering::Relaxed),
            idempotency_hits: c.idempotency_hits.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }
}
