//! Wire-compatible protocol types for the outpost live-events server.
//!
//! Outgoing frames are JSON objects of the form
//! `{"message_type": "...", "outpost_uuid": "...", "data": {...}}`; the
//! `data` object is always serialized, even when empty, because the server
//! rejects frames without it.
//!
//! Incoming frames are `{"name": "...", "data": {...}}`. The reserved
//! `"error"` name carries a server-side error signal that is never routed as
//! a domain event; [`decode_frame`] separates it out as [`InboundFrame::Error`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outpost identifiers are UUID strings assigned by the REST API.
pub type OutpostId = String;

// ── Outgoing ────────────────────────────────────────────────────────

/// Message kinds sent from client to server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingMessageType {
    /// Enter an outpost.
    Join,
    /// Leave an outpost.
    Leave,
    Boo,
    Cheer,
    Like,
    Dislike,
    StartSpeaking,
    StopSpeaking,
    /// Tell the server the user is waiting in the lobby for the creator.
    WaitForCreator,
    StartRecording,
    StopRecording,
    /// Health-check probe; the server answers with `message.echoed`.
    Echo,
}

impl OutgoingMessageType {
    /// Returns `true` for the reaction kinds (`boo`, `cheer`, `like`, `dislike`).
    pub fn is_reaction(self) -> bool {
        matches!(self, Self::Boo | Self::Cheer | Self::Like | Self::Dislike)
    }
}

/// A frame sent from the client to the live-events server.
///
/// # Example
///
/// ```
/// use outpost_live_client::protocol::OutgoingMessage;
///
/// let json = serde_json::to_string(&OutgoingMessage::join("R1")).unwrap();
/// assert_eq!(json, r#"{"message_type":"join","outpost_uuid":"R1","data":{}}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_type: OutgoingMessageType,
    pub outpost_uuid: OutpostId,
    /// Free-form payload. Always present on the wire.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl OutgoingMessage {
    /// Create a message with an empty `data` object.
    pub fn new(message_type: OutgoingMessageType, outpost_uuid: impl Into<OutpostId>) -> Self {
        Self {
            message_type,
            outpost_uuid: outpost_uuid.into(),
            data: Map::new(),
        }
    }

    /// Add a key to the `data` object.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn join(outpost_uuid: impl Into<OutpostId>) -> Self {
        Self::new(OutgoingMessageType::Join, outpost_uuid)
    }

    pub fn leave(outpost_uuid: impl Into<OutpostId>) -> Self {
        Self::new(OutgoingMessageType::Leave, outpost_uuid)
    }

    /// Build an `echo` probe carrying `correlation_id` in `data.uuid`.
    ///
    /// Echo frames are not scoped to an outpost, so `outpost_uuid` is empty.
    pub fn echo(correlation_id: impl Into<String>) -> Self {
        Self::new(OutgoingMessageType::Echo, String::new()).with_data("uuid", correlation_id.into())
    }

    /// Build a reaction aimed at another user in the outpost.
    ///
    /// `amount` is only meaningful for paid reactions and is omitted when `None`.
    pub fn reaction(
        kind: OutgoingMessageType,
        outpost_uuid: impl Into<OutpostId>,
        react_to_user_address: impl Into<String>,
        amount: Option<f64>,
    ) -> Self {
        let mut msg = Self::new(kind, outpost_uuid)
            .with_data("react_to_user_address", react_to_user_address.into());
        if let Some(amount) = amount {
            msg = msg.with_data("amount", amount);
        }
        msg
    }
}

// ── Incoming ────────────────────────────────────────────────────────

/// Event names sent from server to client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IncomingMessageType {
    #[serde(rename = "user.joined")]
    UserJoined,
    #[serde(rename = "user.left")]
    UserLeft,
    #[serde(rename = "user.liked")]
    UserLiked,
    #[serde(rename = "user.disliked")]
    UserDisliked,
    #[serde(rename = "user.booed")]
    UserBooed,
    #[serde(rename = "user.cheered")]
    UserCheered,
    #[serde(rename = "user.started_speaking")]
    UserStartedSpeaking,
    #[serde(rename = "user.stopped_speaking")]
    UserStoppedSpeaking,
    #[serde(rename = "remaining_time.updated")]
    RemainingTimeUpdated,
    #[serde(rename = "user.time_is_up")]
    UserTimeIsUp,
    #[serde(rename = "user.followed")]
    UserFollowed,
    #[serde(rename = "user.invited")]
    UserInvited,
    #[serde(rename = "waitlist.updated")]
    WaitlistUpdated,
    #[serde(rename = "creator.joined")]
    CreatorJoined,
    #[serde(rename = "user.started_recording")]
    UserStartedRecording,
    #[serde(rename = "user.stopped_recording")]
    UserStoppedRecording,
    /// Health-check response.
    #[serde(rename = "message.echoed")]
    MessageEchoed,
}

impl IncomingMessageType {
    /// Reaction notifications (likes, dislikes, boos, cheers).
    pub fn is_reaction(self) -> bool {
        matches!(
            self,
            Self::UserLiked | Self::UserDisliked | Self::UserBooed | Self::UserCheered
        )
    }

    /// Presence notifications: membership and speaking state.
    pub fn is_presence(self) -> bool {
        matches!(
            self,
            Self::UserJoined
                | Self::UserLeft
                | Self::CreatorJoined
                | Self::UserStartedSpeaking
                | Self::UserStoppedSpeaking
                | Self::WaitlistUpdated
        )
    }
}

/// Payload of an incoming frame. Every field is optional; which ones are set
/// depends on the event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingData {
    /// Wallet address of the user the event is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// User uuid, or the correlation id for `message.echoed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        rename = "react_to_user_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub react_to_address: Option<String>,
    #[serde(
        default,
        rename = "outpost_uuid",
        skip_serializing_if = "Option::is_none"
    )]
    pub outpost_id: Option<OutpostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Seconds left in the outpost session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<f64>,
}

/// A domain event frame received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub name: IncomingMessageType,
    #[serde(default)]
    pub data: IncomingData,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A domain event.
    Event(IncomingMessage),
    /// The reserved `error` frame. The payload is kept verbatim for logging.
    Error(Value),
}

/// Name of the reserved server error frame.
pub const ERROR_FRAME_NAME: &str = "error";

/// Decode a raw text frame.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] when the text is not JSON, the `name` is
/// not a known event, or the `data` object has the wrong shape.
pub fn decode_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("name").and_then(Value::as_str) == Some(ERROR_FRAME_NAME) {
        let payload = value.get("data").cloned().unwrap_or(Value::Null);
        return Ok(InboundFrame::Error(payload));
    }
    serde_json::from_value(value).map(InboundFrame::Event)
}

/// Build the socket URL for a session: `<address>?token=<token>`.
///
/// An address without a path gets the root path, since a request URI cannot
/// start with the query.
///
/// ```
/// use outpost_live_client::protocol::connection_url;
///
/// assert_eq!(connection_url("wss://live.example/ws", "t0k"), "wss://live.example/ws?token=t0k");
/// assert_eq!(connection_url("wss://live.example/ws?v=2", "t0k"), "wss://live.example/ws?v=2&token=t0k");
/// assert_eq!(connection_url("wss://live.example", "t0k"), "wss://live.example/?token=t0k");
/// ```
pub fn connection_url(address: &str, token: &str) -> String {
    let (base, query) = match address.split_once('?') {
        Some((base, query)) => (base, query),
        None => (address, ""),
    };
    let root = match base.split_once("://") {
        Some((_, authority)) if !authority.contains('/') => "/",
        _ => "",
    };
    if query.is_empty() {
        format!("{base}{root}?token={token}")
    } else {
        format!("{base}{root}?{query}&token={token}")
    }
}
