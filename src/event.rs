//! Events delivered to the application.
//!
//! The client writes [`LiveEvent`]s to a bounded channel returned from
//! [`OutpostClient::new`](crate::OutpostClient::new). The application applies
//! them to its own state; nothing in this crate knows how that state is
//! stored.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::protocol::{IncomingMessage, OutpostId};

/// Something the application should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A domain notification from the server (presence, reactions, speaking,
    /// recording, remaining time...). Forwarded unchanged.
    Outpost(IncomingMessage),
    /// The connection state changed.
    ConnectionStateChanged(ConnectionState),
    /// Our own join was confirmed and the room has had time to settle; the
    /// application should refetch the outpost's member list.
    MembersRefreshRequested { outpost_uuid: OutpostId },
    /// Reconnection gave up after `attempts` tries. The UI should show a
    /// persistent, dismissable error with a reload action.
    ReconnectExhausted { attempts: u32 },
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<LiveEvent>,
}

impl EventEmitter {
    /// Create an emitter and the receiver handed to the application.
    /// `capacity` is clamped to at least 1 (tokio panics on 0).
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Emit an event. If the channel is full, log a warning and drop the
    /// event so the socket is never blocked on a slow consumer.
    pub(crate) fn emit(&self, event: LiveEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {:?}", std::mem::discriminant(&dropped));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit an event that must not be dropped, waiting for room in the channel.
    pub(crate) async fn emit_reliably(&self, event: LiveEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

#[cfg(test)]
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

    #[tokio::test]
    async fn full_channel_drops_ordinary_events() {
        let (emitter, mut rx) = EventEmitter::channel(1);
        emitter.emit(LiveEvent::ConnectionStateChanged(ConnectionState::Connecting));
        emitter.emit(LiveEvent::ConnectionStateChanged(ConnectionState::Connected));

        assert_eq!(
            rx.recv().await.unwrap(),
            LiveEvent::ConnectionStateChanged(ConnectionState::Connecting)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reliable_emit_waits_for_room() {
        let (emitter, mut rx) = EventEmitter::channel(1);
        emitter.emit(LiveEvent::ConnectionStateChanged(ConnectionState::Disconnected));

        let sender = emitter.clone();
        let task = tokio::spawn(async move {
            sender
                .emit_reliably(LiveEvent::ReconnectExhausted { attempts: 5 })
                .await;
        });

        let _ = rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            LiveEvent::ReconnectExhausted { attempts: 5 }
        );
        task.await.unwrap();
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (emitter, _rx) = EventEmitter::channel(0);
        emitter.emit(LiveEvent::ConnectionStateChanged(ConnectionState::Connected));
    }
}
