//! # Outpost Live Client
//!
//! Async client for the outpost live-events WebSocket server.
//!
//! One [`OutpostClient`] owns one socket. It keeps the socket alive,
//! reconnects with exponential backoff when it drops, and matches replies to
//! the requests that caused them. Joins are confirmed by the server's
//! `user.joined` broadcast and health checks by an echo round-trip. Every
//! other server notification is forwarded to the application as a
//! [`LiveEvent`].
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **Wire-compatible**: [`protocol`] types match the server's JSON frames exactly
//! - **WebSocket built-in**: default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Event-driven**: receive typed [`LiveEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use outpost_live_client::{
//!     LiveClientConfig, LiveEvent, NoMembershipProbe, OutpostClient, WebSocketConnector,
//! };
//!
//! # async fn run() {
//! let config = LiveClientConfig::new("wss://live.example/ws", "0xA1");
//! let (client, mut events) =
//!     OutpostClient::new(config, Arc::new(WebSocketConnector), Arc::new(NoMembershipProbe));
//!
//! if client.connect("session-token").await && client.reliable_join("R1").await {
//!     while let Some(event) = events.recv().await {
//!         if let LiveEvent::ReconnectExhausted { .. } = event {
//!             break;
//!         }
//!     }
//! }
//! client.close().await;
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod event;
pub mod lock;
pub mod membership;
pub mod protocol;
mod router;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::OutpostClient;
pub use config::LiveClientConfig;
pub use connection::ConnectionState;
pub use correlation::CorrelationTimeouts;
pub use error::LiveError;
pub use event::LiveEvent;
pub use membership::{MembershipProbe, NoMembershipProbe};
pub use protocol::{IncomingMessage, IncomingMessageType, OutgoingMessage, OutgoingMessageType};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
