//! WebSocket frame channel using `tokio-tungstenite`.
//!
//! [`WebSocketChannel`] carries the expedition frame protocol over a
//! WebSocket connection and [`WebSocketDialer`] opens one per dial, so a
//! [`SocketClient`](crate::socket::SocketClient) can reconnect by dialing
//! again. Both `ws://` and `wss://` URLs are supported; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use expedition_sync::{SocketClient, SocketConfig, Transport, WebSocketDialer};
//!
//! let dialer = WebSocketDialer::new("ws://localhost:3000/socket");
//! let client = SocketClient::start(dialer, SocketConfig::default());
//! client.join_expedition(42);
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::socket::{Dialer, FrameChannel};

/// Default time allowed for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`FrameChannel`] backed by one WebSocket connection.
///
/// The stream is dropped on [`close`](FrameChannel::close); after that
/// `recv` yields `None` and `send` fails with [`SyncError::TransportClosed`].
///
/// [`recv`](FrameChannel::recv) is cancel-safe.
#[derive(Debug)]
pub struct WebSocketChannel {
    stream: Option<WsStream>,
}

impl WebSocketChannel {
    /// Connect to `url` with no time limit on the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the URL is invalid or the handshake
    /// fails. Socket errors are passed through as they are.
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        debug!(url = %url, "opening expedition socket");
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(handshake_error)?;
        info!(url = %url, status = %response.status(), "expedition socket open");
        Ok(Self::from_stream(stream))
    }

    /// Like [`connect`](Self::connect), failing with [`SyncError::Timeout`]
    /// when the handshake takes longer than `limit`.
    pub async fn connect_within(url: &str, limit: Duration) -> Result<Self, SyncError> {
        match tokio::time::timeout(limit, Self::connect(url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url = %url, ?limit, "expedition socket handshake timed out");
                Err(SyncError::Timeout)
            }
        }
    }

    /// Wrap a stream set up elsewhere (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

fn handshake_error(err: WsError) -> SyncError {
    match err {
        WsError::Io(io) => SyncError::Io(io),
        other => SyncError::Io(io::Error::other(other)),
    }
}

#[async_trait]
impl FrameChannel for WebSocketChannel {
    async fn send(&mut self, frame: String) -> Result<(), SyncError> {
        let stream = self.stream.as_mut().ok_or(SyncError::TransportClosed)?;
        stream
            .send(Message::text(frame))
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        let stream = self.stream.as_mut()?;
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed expedition socket");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    warn!(len = bytes.len(), "dropping binary frame, protocol is text only");
                }
                // Pings are answered by tungstenite.
                Ok(_) => {}
                Err(e) => return Some(Err(SyncError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .close(None)
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }
}

/// Dials a fresh [`WebSocketChannel`] to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketDialer {
    /// Defaults to a **10 second** connect timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self) -> Result<Box<dyn FrameChannel>, SyncError> {
        let channel = WebSocketChannel::connect_within(&self.url, self.connect_timeout).await?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::ClientFrame;
    use crate::socket::{SocketClient, SocketConfig};
    use crate::transport::{Transport, TransportEvent};
    use crate::update::UpdateKind;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn websocket_channel_is_send_and_debug() {
        fn assert_bounds<T: Send + std::fmt::Debug>() {}
        assert_bounds::<WebSocketChannel>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketChannel::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[tokio::test]
    async fn dial_fails_with_unreachable_host() {
        let err = WebSocketDialer::new("ws://127.0.0.1:1").dial().await.err().unwrap();
        match err {
            SyncError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dial_times_out() {
        // Non-routable address.
        let err = WebSocketDialer::new("ws://192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50))
            .dial()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Timeout));
    }

    // ── Mock server ──────────────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_skips_binary_and_stops_at_close() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into())).await.unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut channel = WebSocketChannel::connect(&url).await.unwrap();
        assert_eq!(channel.recv().await.unwrap().unwrap(), "after_binary");
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_rejected_and_close_is_idempotent() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut channel = WebSocketChannel::connect(&url).await.unwrap();
        assert!(!channel.is_closed());
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(channel.is_closed());

        let err = channel.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportClosed));
        assert!(channel.recv().await.is_none());
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("listener closed")
    }

    #[tokio::test]
    async fn socket_client_over_websocket() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let url = start_mock_server(move |mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                seen_tx.send(text.to_string()).unwrap();
            }
            let frame = r#"{"event":"expeditionCompleted","data":{"expedition_id":9,"expedition_name":"Havana","timestamp":"2026-03-01T12:00:00Z","completed_by":"Anne"}}"#;
            ws.send(Message::Text(frame.into())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let client = SocketClient::start(WebSocketDialer::new(url), SocketConfig::default());
        let (tx, mut events) = mpsc::unbounded_channel();
        client.on(tx);

        assert_eq!(next(&mut events).await, TransportEvent::Connected);

        client.join_expedition(9);
        let sent: ClientFrame =
            serde_json::from_str(&seen_rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent, ClientFrame::JoinExpedition { expedition_id: 9 });

        match next(&mut events).await {
            TransportEvent::Update(update) => {
                assert_eq!(update.kind(), UpdateKind::ExpeditionCompleted);
                assert_eq!(update.expedition_id, 9);
            }
            other => panic!("expected update, got {other:?}"),
        }

        client.shutdown().await;
    }
}
