//! Transport abstraction for the outpost live-events socket.
//!
//! The [`Transport`] trait is a bidirectional text message channel: one
//! call to [`send`](Transport::send) writes one JSON frame, one call to
//! [`recv`](Transport::recv) yields one. Keep-alive is a separate method so
//! transports can map it onto a native control frame.
//!
//! # Connection Setup
//!
//! Opening a transport is not part of [`Transport`]; it is the job of a
//! [`Connector`]. The connection manager owns a connector because it has to
//! open fresh sockets on its own when reconnecting.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use outpost_live_client::error::LiveError;
//! use outpost_live_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), LiveError> {
//!         // Write the JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LiveError>> {
//!         // Next JSON text frame; None when the peer closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), LiveError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, LiveError> {
//!         Ok(Box::new(MyTransport { /* dial `url` */ }))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::LiveError;

/// A bidirectional text message transport.
///
/// # Object Safety
///
/// This trait is object-safe; the connection manager drives transports as
/// `Box<dyn Transport>` handed out by a [`Connector`].
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::TransportSend`] if the message could not be sent
    /// (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), LiveError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred (e.g., [`LiveError::TransportReceive`])
    /// - `None`: the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, LiveError>>;

    /// Send a keep-alive signal.
    ///
    /// The default does nothing, for transports whose peer needs no
    /// liveness traffic.
    ///
    /// # Errors
    ///
    /// A failure here is treated as a lost connection.
    async fn send_keepalive(&mut self) -> Result<(), LiveError> {
        Ok(())
    }

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send) and
    /// [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), LiveError>;
}

/// Opens transports. The URL already carries the session token.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connected transport to `url`.
    ///
    /// The connection manager bounds this call with its connect timeout, so
    /// implementations do not need their own.
    ///
    /// # Errors
    ///
    /// Any error means the attempt failed and may be retried with backoff.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, LiveError>;
}
