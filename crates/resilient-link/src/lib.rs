//! # resilient-link
//!
//! Resilient client-side communication layer: a categorized error taxonomy,
//! retry with exponential backoff, in-flight request deduplication,
//! idempotency keys for mutating operations, and a self-healing WebSocket
//! pub/sub session.
//!
//! ## Features
//!
//! - **Error taxonomy**: every failure is an [`ApiError`] with a category,
//!   severity, retryability and a user-facing message.
//! - **Retry**: transient (network, 5xx) failures are retried with capped
//!   exponential backoff.
//! - **Deduplication**: concurrent identical GETs share one network call.
//! - **Idempotency**: `with_idempotency` runs a mutation at most once per key.
//! - **WebSocket**: heartbeat, reconnect with backoff, offline queue and
//!   topic subscriptions.
//! - **Observability**: `tracing` logs and OpenTelemetry counters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilient_link::{
//!     auth::StaticToken,
//!     http::{HttpClient, HttpConfig, ReqwestTransport, RequestConfig},
//!     telemetry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     telemetry::init_tracing(None)?;
//!
//!     let client = HttpClient::builder(ReqwestTransport::new()?)
//!         .config(HttpConfig::new("https://api.example.com"))
//!         .credential(StaticToken::new("token"))
//!         .build()?;
//!
//!     let stats: serde_json::Value = client.get("/stats", RequestConfig::new()).await?;
//!     println!("{stats}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backoff;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod hooks;
pub mod http;
pub mod idempotency;
pub mod metrics;
pub mod retry;
pub mod telemetry;
pub mod transport;
pub mod websocket;

pub use error::{ApiError, ApiResult, ConfigError, ErrorCategory, ErrorSeverity};
pub use hooks::{
    AfterResponseHook, BeforeRequestHook, BeforeRetryHook, HeaderInjectionHook, HookError, Hooks,
    LoggingHook, OnErrorHook, RequestIdHook,
};
pub use http::{HttpClient, HttpConfig, RequestConfig};
pub use idempotency::{IdempotencyConfig, IdempotencyError, IdempotencyKeyManager};
pub use retry::{RetryExecutor, RetryOptions};
pub use transport::{Method, Request, Response, Transport, TransportFailure};
pub use websocket::{SessionConfig, SessionEvent, WebSocketSession};
