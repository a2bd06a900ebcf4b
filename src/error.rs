//! Error types for the outpost live client.

use thiserror::Error;

/// Errors that can occur at the transport and correlation seams of the client.
///
/// The high-level [`OutpostClient`](crate::OutpostClient) operations report
/// failure as `false` rather than surfacing these directly; they show up in
/// logs and in the lower-level APIs ([`Transport`](crate::Transport),
/// [`CorrelationTable`](crate::correlation::CorrelationTable)).
#[derive(Debug, Error)]
pub enum LiveError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// A pending operation was cancelled by a connection teardown.
    #[error("operation cancelled by connection teardown")]
    Cancelled,

    /// The out-of-band membership query failed.
    #[error("membership query failed: {0}")]
    Membership(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for outpost live client operations.
pub type Result<T> = std::result::Result<T, LiveError>;
