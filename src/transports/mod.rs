//! Transport implementations for the outpost live-events socket.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), outpost_live_client::LiveError> {
//! use outpost_live_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("wss://live.example/ws?token=abc").await?;
//! ws.send(r#"{"message_type":"echo","outpost_uuid":"","data":{"uuid":"1"}}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
