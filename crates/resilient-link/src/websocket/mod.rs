//! Self-healing WebSocket pub/sub session.
//!
//! A [`WebSocketSession`] owns a background driver task that:
//!
//! - connects through a [`SocketConnector`] and flushes frames queued while offline,
//! - sends `{"type":"ping"}` every `ping_interval` and reconnects when nothing
//!   arrives within `pong_timeout`,
//! - reconnects with capped exponential backoff until `reconnect_max_attempts`,
//! - parses every inbound frame as an [`Envelope`] and dispatches its payload
//!   to the handlers subscribed to its `type`.
//!
//! Runtime failures never surface as errors from the session: they are
//! reported as [`SessionEvent`]s.
//!
//! ```no_run
//! # async fn demo() -> Result<(), resilient_link::websocket::SessionError> {
//! use resilient_link::websocket::{SessionConfig, WebSocketSession};
//!
//! let session = WebSocketSession::tungstenite(SessionConfig::new("wss://api.example.com/ws"))?;
//! let _updates = session.subscribe("agent_update", |payload| {
//!     println!("update: {payload}");
//! });
//! session.connect().await?;
//! session.send("chat", &serde_json::json!({ "text": "hi" }))?;
//! # Ok(())
//! # }
//! ```

mod config;
mod envelope;
mod queue;
mod session;
mod socket;
mod subscription;

pub use self::{
    config::SessionConfig,
    envelope::{Envelope, PING, PONG},
    session::{
        ConnectionEpoch, SendOutcome, SessionError, SessionEvent, SessionState, SessionStats,
        WebSocketSession, WebSocketSessionBuilder,
    },
    socket::{FrameStream, SocketConnector, SocketError, SocketWriter},
    subscription::{MessageHandler, Subscription},
};
#[cfg(feature = "tungstenite")]
pub use self::socket::TungsteniteConnector;
