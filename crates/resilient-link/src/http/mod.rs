//! HTTP client.
//!
//! [`HttpClient`] composes the pieces of the crate around a [`Transport`]:
//!
//! ```text
//! get/post/put/patch/delete
//!   └─ RequestDeduplicator      (GET only, unless skipped)
//!       └─ cancellation handle  (METHOD:url)
//!           └─ RetryExecutor    (unless skipped)
//!               └─ hooks → timeout(transport.send) → classify
//! ```
//!
//! Every failure leaving the client is an [`ApiError`](crate::error::ApiError),
//! logged once at a level matching its severity.
//!
//! [`Transport`]: crate::transport::Transport

mod cancel;
mod client;
mod config;
#[cfg(feature = "reqwest")]
mod reqwest_transport;

pub use self::{
    cancel::{CancelHandle, CancellationRegistry, cancel_key},
    client::{HttpClient, HttpClientBuilder},
    config::{HttpConfig, IDEMPOTENCY_KEY_HEADER, RequestConfig},
};
#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;
