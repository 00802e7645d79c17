use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{Notify, broadcast, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until, timeout},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{
    config::SessionConfig,
    envelope::Envelope,
    queue::OutboundQueue,
    socket::{FrameStream, SocketConnector, SocketError, SocketWriter},
    subscription::{MessageHandler, Subscription, SubscriptionRegistry, subscribe},
};
use crate::metrics::ClientMetrics;

/// Incremented on every successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionEpoch(pub u64);

/// Session state machine.
///
/// `Connecting → Connected`, then `Reconnecting → Connecting → Connected` on
/// every drop. `Disconnected` is the state before the first connect, and is
/// entered again only by [`WebSocketSession::disconnect`] or when the
/// reconnect budget runs out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        /// 1-based reconnect attempt about to be made.
        attempt: u32,
    },
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Lifecycle and inbound traffic, broadcast to every [`WebSocketSession::events`]
/// receiver.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Connected { epoch: ConnectionEpoch },
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal: emitted after [`WebSocketSession::disconnect`] or `GaveUp`.
    Disconnected { reason: String },
    /// The reconnect budget is exhausted. Followed by `Disconnected`.
    GaveUp { attempts: u32 },
    /// A recoverable failure: a malformed frame, a failed connect or a
    /// dropped connection that will be retried.
    Error { message: String },
    Message(Envelope),
}

/// Result of [`WebSocketSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live connection.
    Sent,
    /// Held in the outbound queue until the next connect.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub connected: bool,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Time since the current connection opened; zero while disconnected.
    pub connection_duration: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    Config(String),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Connection failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("Session was disconnected")]
    Closed,
}

/// State and queue change together so a frame is either queued before the
/// flush or handed to a live connection, never lost in between.
struct Shared {
    state: watch::Sender<SessionState>,
    queue: OutboundQueue,
    connected_at: Option<Instant>,
    epoch: ConnectionEpoch,
    closed: bool,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn SocketConnector>,
    shared: Mutex<Shared>,
    state_rx: watch::Receiver<SessionState>,
    outbound: Notify,
    subscriptions: Arc<SubscriptionRegistry>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    metrics: ClientMetrics,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        let mut shared = self.shared.lock();
        if state != SessionState::Connected {
            shared.connected_at = None;
        }
        shared.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// A self-healing JSON pub/sub channel.
///
/// Cloning shares the connection. The background driver stops when
/// [`disconnect`](Self::disconnect) is called or the last clone is dropped.
#[derive(Clone)]
pub struct WebSocketSession {
    inner: Arc<SessionInner>,
    _shutdown_on_drop: Arc<DropGuard>,
}

impl fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("queued", &self.queued_len())
            .finish()
    }
}

impl WebSocketSession {
    pub fn new(
        config: SessionConfig,
        connector: impl SocketConnector,
    ) -> Result<Self, SessionError> {
        Self::builder(config).build(connector)
    }

    pub fn builder(config: SessionConfig) -> WebSocketSessionBuilder {
        WebSocketSessionBuilder {
            config,
            metrics: None,
        }
    }

    /// Session using the `tokio-tungstenite` connector.
    #[cfg(feature = "tungstenite")]
    pub fn tungstenite(config: SessionConfig) -> Result<Self, SessionError> {
        Self::new(config, super::socket::TungsteniteConnector::new())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start the connection driver and wait for the first attempt.
    ///
    /// On failure the driver keeps reconnecting in the background; the error
    /// only reports that the first attempt did not succeed.
    pub async fn connect(&self) -> Result<(), SessionError> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.closed {
                return Err(SessionError::Closed);
            }
            let mut driver = self.inner.driver.lock();
            let running = driver.as_ref().is_some_and(|handle| !handle.is_finished());
            if !running {
                shared.state.send_replace(SessionState::Connecting);
                drop(shared);
                *driver = Some(tokio::spawn(run_driver(Arc::clone(&self.inner))));
            }
        }

        let mut state_rx = self.inner.state_rx.clone();
        let state = state_rx
            .wait_for(|state| *state != SessionState::Connecting)
            .await
            .map_err(|_| SessionError::Closed)?
            .clone();
        match state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected if self.inner.shared.lock().closed => {
                Err(SessionError::Closed)
            }
            other => Err(SessionError::ConnectFailed {
                reason: format!("session is {other:?}"),
            }),
        }
    }

    /// Close the connection and stop reconnecting. Terminal.
    pub async fn disconnect(&self) {
        {
            let mut shared = self.inner.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
        }
        self.inner.shutdown.cancel();

        let handle = self.inner.driver.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "WebSocket driver task failed");
        }

        self.inner.set_state(SessionState::Disconnected);
        self.inner.emit(SessionEvent::Disconnected {
            reason: "client disconnect".to_string(),
        });
        tracing::info!(url = %self.inner.config.url, "WebSocket session closed");
    }

    /// Send `{"type": kind, "payload": payload}`.
    pub fn send<T: Serialize>(&self, kind: &str, payload: &T) -> Result<SendOutcome, SessionError> {
        self.send_envelope(&Envelope::with_payload(kind, payload)?)
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<SendOutcome, SessionError> {
        self.send_raw(envelope.to_text()?)
    }

    /// Send a pre-serialized frame.
    ///
    /// While connected the frame goes straight to the driver. Otherwise it is
    /// queued, evicting the oldest frame once the queue is full.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<SendOutcome, SessionError> {
        let mut shared = self.inner.shared.lock();
        if shared.closed {
            return Err(SessionError::Closed);
        }
        let connected = shared.state.borrow().is_connected();
        if shared.queue.push(text.into()).is_some() {
            tracing::warn!(
                max_queue_size = self.inner.config.max_queue_size,
                "Outbound queue full, dropped oldest message"
            );
        }
        drop(shared);

        if connected {
            self.inner.outbound.notify_one();
            Ok(SendOutcome::Sent)
        } else {
            Ok(SendOutcome::Queued)
        }
    }

    /// Register `handler` for frames whose `type` equals `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        subscribe(&self.inner.subscriptions, topic, handler)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.subscriptions.subscriber_count(topic)
    }

    pub fn queued_len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    pub fn epoch(&self) -> ConnectionEpoch {
        self.inner.shared.lock().epoch
    }

    pub fn stats(&self) -> SessionStats {
        let shared = self.inner.shared.lock();
        let connected = shared.state.borrow().is_connected();
        SessionStats {
            connected,
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            connection_duration: shared
                .connected_at
                .map(|at| at.elapsed())
                .unwrap_or_default(),
        }
    }
}

pub struct WebSocketSessionBuilder {
    config: SessionConfig,
    metrics: Option<ClientMetrics>,
}

impl WebSocketSessionBuilder {
    #[must_use]
    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self, connector: impl SocketConnector) -> Result<WebSocketSession, SessionError> {
        self.config.validate().map_err(SessionError::Config)?;

        let (state, state_rx) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(self.config.event_channel_capacity);
        let shutdown = CancellationToken::new();
        let queue = OutboundQueue::new(self.config.max_queue_size);

        let inner = Arc::new(SessionInner {
            connector: Arc::new(connector),
            shared: Mutex::new(Shared {
                state,
                queue,
                connected_at: None,
                epoch: ConnectionEpoch::default(),
                closed: false,
            }),
            state_rx,
            outbound: Notify::new(),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            events,
            shutdown: shutdown.clone(),
            driver: Mutex::new(None),
            metrics: self.metrics.unwrap_or_default(),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            config: self.config,
        });

        Ok(WebSocketSession {
            inner,
            _shutdown_on_drop: Arc::new(shutdown.drop_guard()),
        })
    }
}

/// Why a live connection ended.
enum ConnectionExit {
    Shutdown,
    Lost(String),
}

async fn run_driver(inner: Arc<SessionInner>) {
    let backoff = inner.config.backoff();
    let mut reconnect_attempt: u32 = 0;

    loop {
        inner.set_state(SessionState::Connecting);

        let connect = timeout(
            inner.config.connect_timeout,
            inner.connector.connect(&inner.config.url),
        );
        let result = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            result = connect => result,
        };

        let reason = match result {
            Ok(Ok((writer, frames))) => {
                reconnect_attempt = 0;
                match run_connection(&inner, writer, frames).await {
                    ConnectionExit::Shutdown => return,
                    ConnectionExit::Lost(reason) => {
                        tracing::warn!(url = %inner.config.url, reason = %reason, "WebSocket connection lost");
                        inner.emit(SessionEvent::Error {
                            message: format!("Connection lost: {reason}"),
                        });
                        reason
                    }
                }
            }
            Ok(Err(err)) => connect_failed(&inner, err),
            Err(_) => connect_failed(&inner, SocketError::Timeout(inner.config.connect_timeout)),
        };

        if let Some(max) = inner.config.reconnect_max_attempts
            && reconnect_attempt >= max
        {
            tracing::error!(
                url = %inner.config.url,
                attempts = reconnect_attempt,
                reason = %reason,
                "WebSocket reconnect budget exhausted"
            );
            inner.set_state(SessionState::Disconnected);
            inner.emit(SessionEvent::GaveUp {
                attempts: reconnect_attempt,
            });
            inner.emit(SessionEvent::Disconnected { reason });
            return;
        }

        let delay = backoff.delay_for(reconnect_attempt);
        reconnect_attempt = reconnect_attempt.saturating_add(1);

        inner.set_state(SessionState::Reconnecting {
            attempt: reconnect_attempt,
        });
        inner.emit(SessionEvent::Reconnecting {
            attempt: reconnect_attempt,
            delay,
        });
        inner.metrics.record_reconnect(reconnect_attempt);
        tracing::info!(
            attempt = reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Reconnecting WebSocket"
        );

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

fn connect_failed(inner: &SessionInner, err: SocketError) -> String {
    let reason = err.to_string();
    tracing::warn!(url = %inner.config.url, error = %reason, "WebSocket connect failed");
    inner.emit(SessionEvent::Error {
        message: reason.clone(),
    });
    reason
}

/// Flush the queue oldest-first, then mark the session connected.
///
/// The final empty check and the state change happen under one lock so a
/// concurrent `send_raw` either lands in this flush or sees `Connected`.
async fn flush_and_open(
    inner: &SessionInner,
    writer: &mut dyn SocketWriter,
) -> Result<ConnectionEpoch, String> {
    loop {
        let next = {
            let mut shared = inner.shared.lock();
            match shared.queue.pop() {
                Some(frame) => frame,
                None => {
                    shared.epoch.0 += 1;
                    shared.connected_at = Some(Instant::now());
                    shared.state.send_replace(SessionState::Connected);
                    return Ok(shared.epoch);
                }
            }
        };
        write_frame(inner, writer, next).await?;
    }
}

/// Write one queued frame, putting it back at the head on failure.
async fn write_frame(
    inner: &SessionInner,
    writer: &mut dyn SocketWriter,
    frame: String,
) -> Result<(), String> {
    match writer.send(frame.clone()).await {
        Ok(()) => {
            inner.messages_sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(err) => {
            inner.shared.lock().queue.requeue(frame);
            Err(err.to_string())
        }
    }
}

async fn drain_queue(inner: &SessionInner, writer: &mut dyn SocketWriter) -> Result<(), String> {
    loop {
        let next = inner.shared.lock().queue.pop();
        let Some(frame) = next else {
            return Ok(());
        };
        write_frame(inner, writer, frame).await?;
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn control_frame(envelope: &Envelope) -> Result<String, String> {
    envelope.to_text().map_err(|e| e.to_string())
}

async fn run_connection(
    inner: &SessionInner,
    mut writer: Box<dyn SocketWriter>,
    mut frames: FrameStream,
) -> ConnectionExit {
    let epoch = match flush_and_open(inner, writer.as_mut()).await {
        Ok(epoch) => epoch,
        Err(reason) => return ConnectionExit::Lost(reason),
    };
    tracing::info!(url = %inner.config.url, epoch = epoch.0, "WebSocket connected");
    inner.emit(SessionEvent::Connected { epoch });

    let ping_every = inner.config.ping_interval;
    let mut ping_interval = interval_at(Instant::now() + ping_every, ping_every);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => {
                writer.close().await;
                break ConnectionExit::Shutdown;
            }
            frame = frames.next() => {
                let text = match frame {
                    Some(Ok(text)) => text,
                    Some(Err(err)) => break ConnectionExit::Lost(err.to_string()),
                    None => break ConnectionExit::Lost(SocketError::Closed.to_string()),
                };
                // Any traffic proves the connection alive.
                pong_deadline = None;
                inner.messages_received.fetch_add(1, Ordering::Relaxed);

                let envelope = match Envelope::parse(&text) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(epoch = epoch.0, error = %err, "Dropping malformed frame");
                        inner.emit(SessionEvent::Error {
                            message: format!("Malformed frame: {err}"),
                        });
                        continue;
                    }
                };

                if envelope.is_pong() {
                    continue;
                }
                if envelope.is_ping() {
                    let sent = match control_frame(&Envelope::pong()) {
                        Ok(pong) => writer.send(pong).await.map_err(|e| e.to_string()),
                        Err(err) => Err(err),
                    };
                    if let Err(reason) = sent {
                        break ConnectionExit::Lost(reason);
                    }
                    continue;
                }

                let handled = inner.subscriptions.dispatch(&envelope.kind, &envelope.payload);
                tracing::trace!(epoch = epoch.0, topic = %envelope.kind, handled, "Dispatched frame");
                inner.emit(SessionEvent::Message(envelope));
            }
            _ = inner.outbound.notified() => {
                if let Err(reason) = drain_queue(inner, writer.as_mut()).await {
                    break ConnectionExit::Lost(reason);
                }
            }
            _ = ping_interval.tick() => {
                let sent = match control_frame(&Envelope::ping()) {
                    Ok(ping) => writer.send(ping).await.map_err(|e| e.to_string()),
                    Err(err) => Err(err),
                };
                if let Err(reason) = sent {
                    break ConnectionExit::Lost(reason);
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + inner.config.pong_timeout);
                }
            }
            _ = deadline_elapsed(pong_deadline) => {
                break ConnectionExit::Lost("Pong timeout".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    /// Connector whose connections are fed by test-owned channels.
    struct ChannelConnector {
        attempts: Arc<Mutex<VecDeque<Result<mpsc::UnboundedReceiver<String>, SocketError>>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingWriter {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SocketWriter for RecordingWriter {
        async fn send(&mut self, text: String) -> Result<(), SocketError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl SocketConnector for ChannelConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> Result<(Box<dyn SocketWriter>, FrameStream), SocketError> {
            let next = self.attempts.lock().pop_front();
            let rx = next.unwrap_or(Err(SocketError::Connect("no more scripted attempts".into())))?;
            let frames = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|text| (Ok(text), rx))
            })
            .boxed();
            Ok((
                Box::new(RecordingWriter {
                    sent: Arc::clone(&self.sent),
                }),
                frames,
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_frames_flush_before_connected() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = ChannelConnector {
            attempts: Arc::new(Mutex::new(VecDeque::from([Ok(rx)]))),
            sent: Arc::clone(&sent),
        };
        let session = WebSocketSession::new(SessionConfig::new("ws://test"), connector).unwrap();

        assert_eq!(session.send("a", &1).unwrap(), SendOutcome::Queued);
        assert_eq!(session.send("b", &2).unwrap(), SendOutcome::Queued);
        assert_eq!(session.queued_len(), 2);

        session.connect().await.unwrap();
        assert_eq!(session.queued_len(), 0);
        assert_eq!(
            *sent.lock(),
            vec![
                r#"{"type":"a","payload":1}"#.to_string(),
                r#"{"type":"b","payload":2}"#.to_string()
            ]
        );
        assert_eq!(session.stats().messages_sent, 2);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_ping_is_answered() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = ChannelConnector {
            attempts: Arc::new(Mutex::new(VecDeque::from([Ok(rx)]))),
            sent: Arc::clone(&sent),
        };
        let session = WebSocketSession::new(SessionConfig::new("ws://test"), connector).unwrap();
        session.connect().await.unwrap();

        tx.send(r#"{"type":"ping"}"#.to_string()).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(*sent.lock(), vec![r#"{"type":"pong"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_terminal() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let connector = ChannelConnector {
            attempts: Arc::new(Mutex::new(VecDeque::from([Ok(rx)]))),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let session = WebSocketSession::new(SessionConfig::new("ws://test"), connector).unwrap();
        session.connect().await.unwrap();
        assert!(session.stats().connected);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.send("x", &json!(null)), Err(SessionError::Closed)));
        assert!(matches!(session.connect().await, Err(SessionError::Closed)));
        assert_eq!(session.stats(), SessionStats::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let connector = ChannelConnector {
            attempts: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let result = WebSocketSession::new(SessionConfig::default(), connector);
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
