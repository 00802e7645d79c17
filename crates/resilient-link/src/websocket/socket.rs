//! The raw socket primitive the session drives.
//!
//! A [`SocketConnector`] opens a connection and splits it into a writer for
//! outbound text frames and a stream of inbound text frames. The stream ends
//! when the peer closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Inbound text frames. `None` means the peer closed the connection.
pub type FrameStream = BoxStream<'static, Result<String, SocketError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SocketError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,
}

/// Writing half of an open connection.
#[async_trait]
pub trait SocketWriter: Send {
    async fn send(&mut self, text: String) -> Result<(), SocketError>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}

/// Opens connections for a [`WebSocketSession`](super::WebSocketSession).
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str)
    -> Result<(Box<dyn SocketWriter>, FrameStream), SocketError>;
}

#[cfg(feature = "tungstenite")]
pub use self::tungstenite_backend::TungsteniteConnector;

#[cfg(feature = "tungstenite")]
mod tungstenite_backend {
    use async_trait::async_trait;
    use futures_util::{Sink, SinkExt, StreamExt, future};
    use tokio_tungstenite::tungstenite::{self, Message};

    use super::{FrameStream, SocketConnector, SocketError, SocketWriter};

    /// Connects with `tokio-tungstenite`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TungsteniteConnector;

    impl TungsteniteConnector {
        pub fn new() -> Self {
            Self
        }
    }

    struct TungsteniteWriter<S> {
        sink: S,
    }

    #[async_trait]
    impl<S> SocketWriter for TungsteniteWriter<S>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
    {
        async fn send(&mut self, text: String) -> Result<(), SocketError> {
            self.sink
                .send(Message::text(text))
                .await
                .map_err(|e| SocketError::Send(e.to_string()))
        }

        async fn close(&mut self) {
            if let Err(err) = self.sink.close().await {
                tracing::debug!(error = %err, "WebSocket close handshake failed");
            }
        }
    }

    fn frame_text(message: Message) -> Option<Result<String, SocketError>> {
        match message {
            Message::Text(text) => Some(Ok(text.as_str().to_owned())),
            Message::Binary(data) => Some(
                String::from_utf8(data.to_vec())
                    .map_err(|e| SocketError::Receive(format!("Binary frame is not UTF-8: {e}"))),
            ),
            // Pings are answered by tungstenite itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_) => None,
        }
    }

    #[async_trait]
    impl SocketConnector for TungsteniteConnector {
        async fn connect(
            &self,
            url: &str,
        ) -> Result<(Box<dyn SocketWriter>, FrameStream), SocketError> {
            let (stream, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| SocketError::Connect(e.to_string()))?;
            let (sink, read) = stream.split();

            let frames = read
                .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
                .filter_map(|message| {
                    future::ready(match message {
                        Ok(message) => frame_text(message),
                        Err(err) => Some(Err(SocketError::Receive(err.to_string()))),
                    })
                })
                .boxed();

            Ok((Box::new(TungsteniteWriter { sink }), frames))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_frame_text() {
            assert_eq!(
                frame_text(Message::text("hello")).unwrap().unwrap(),
                "hello"
            );
            assert_eq!(
                frame_text(Message::binary(b"{}".to_vec())).unwrap().unwrap(),
                "{}"
            );
            assert!(frame_text(Message::binary(vec![0xff, 0xfe])).unwrap().is_err());
            assert!(frame_text(Message::Ping(Default::default())).is_none());
        }

        #[tokio::test]
        async fn test_connect_refused() {
            let result = TungsteniteConnector::new().connect("ws://127.0.0.1:9/").await;
            assert!(matches!(result, Err(SocketError::Connect(_))));
        }
    }
}
