//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the JSON text frames of the live-events
//! protocol; [`WebSocketConnector`] is the [`Connector`] the connection
//! manager uses to (re)open it. Both `ws://` and `wss://` URLs are supported,
//! TLS is handled by [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! Keep-alive is an unsolicited pong control frame (first header byte
//! `0x8A`: FIN + opcode `0xA`) with an empty payload. Servers treat it as a
//! heartbeat and never answer it.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, protocol::Message};

use crate::error::LiveError;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from an
/// existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors are
    /// mapped to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, LiveError> {
        // The query string carries the session token; keep it out of logs.
        let endpoint = url.split('?').next().unwrap_or(url);
        tracing::debug!(endpoint = %endpoint, "connecting to live-events server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            LiveError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(endpoint = %endpoint, "WebSocket connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Create a [`WebSocketTransport`] from an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

impl WebSocketTransport {
    /// Write one frame. A failed write leaves the socket unusable, so later
    /// writes report [`LiveError::TransportClosed`] and the connection
    /// manager sees the link as lost.
    async fn write(&mut self, frame: Message) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::TransportClosed);
        }
        if let Err(e) = self.stream.send(frame).await {
            self.closed = true;
            return Err(LiveError::TransportSend(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LiveError> {
        self.write(Message::Text(message.into())).await
    }

    async fn recv(&mut self) -> Option<Result<String, LiveError>> {
        if self.closed {
            return None;
        }
        while let Some(next) = self.stream.next().await {
            match next {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or_default();
                    tracing::info!(code, %reason, "live-events server closed the socket");
                    return None;
                }
                // Pings are answered by tungstenite; pongs echo our keep-alives.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Binary(bytes)) => {
                    tracing::warn!(
                        len = bytes.len(),
                        "live-events frames are JSON text; skipping binary frame"
                    );
                }
                Err(e) => return Some(Err(LiveError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn send_keepalive(&mut self) -> Result<(), LiveError> {
        self.write(Message::Pong(Vec::<u8>::new().into())).await
    }

    /// Send the close handshake. A socket the server already dropped counts
    /// as closed.
    async fn close(&mut self) -> Result<(), LiveError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(LiveError::TransportSend(e.to_string())),
        }
    }
}

/// Opens a [`WebSocketTransport`] per connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, LiveError> {
        let transport = WebSocketTransport::connect(url).await?;
        Ok(Box::new(transport))
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
    use crate::protocol::connection_url;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, LiveError::Io(_)));
    }

    #[tokio::test]
    async fn connector_fails_with_unreachable_host() {
        let result = WebSocketConnector.connect("ws://127.0.0.1:1/?token=t").await;
        assert!(matches!(result, Err(LiveError::Io(_))));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
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

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_skips_binary_and_returns_text() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"name":"user.left","data":{}}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"name":"user.left","data":{}}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn keepalive_arrives_as_pong_frame() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(frame)) = ws.next().await {
                let _ = seen_tx.send(frame);
            }
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send_keepalive().await.unwrap();

        let frame = seen_rx.await.unwrap();
        assert!(matches!(frame, Message::Pong(ref payload) if payload.is_empty()));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, LiveError::TransportClosed));
        let err = transport.send_keepalive().await.unwrap_err();
        assert!(matches!(err, LiveError::TransportClosed));
    }

    #[tokio::test]
    async fn close_after_server_hangup_succeeds() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
        transport.close().await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connector_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector
            .connect(&connection_url(&url, "abc"))
            .await
            .unwrap();
        transport.send("ping_echo".to_string()).await.unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, "ping_echo");
    }
}
