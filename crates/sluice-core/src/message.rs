use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Direction a processing chain is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Transport → agent.
    Inbound,
    /// Agent → transport.
    Outbound,
}

/// A raw transport event, before canonicalisation.
///
/// This is what a transport adapter hands to `Connector::handle`. The
/// adapter is responsible for mapping its wire payload (socket frame,
/// webhook body, …) into this shape; the pipeline never sees the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    /// Stable conversation identifier, when the transport supplied one.
    pub sender_id: Option<String>,

    /// Plain text content of the event.
    pub text: String,

    /// Transport-specific extras carried through untouched.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Canonical inbound message flowing through a chain.
///
/// Created once per transport event, mutated in place by stages, and
/// read-only for the terminal sink. The coalescer may pick the first
/// message of a batch as survivor and overwrite its `text` with the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUID v4).
    pub id: String,

    /// Opaque stable identifier for the conversation.
    pub sender_id: String,

    /// Text payload. Stages mutate this in place.
    pub text: String,

    pub direction: Direction,

    /// Opaque metadata map, owned by stages that care about it.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// RFC 3339 timestamp of when the event was accepted.
    pub received_at: String,
}

impl Message {
    pub fn new(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            text: text.into(),
            direction: Direction::Inbound,
            metadata: Map::new(),
            received_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Payload delivered back to a transport on the outbound chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,

    /// Quick-reply buttons, when the agent produced any.
    #[serde(default)]
    pub buttons: Vec<Button>,

    /// Agent-specific extras carried through untouched.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A single quick-reply button on an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    /// Label shown to the user. Stages may rewrite it (e.g. translation).
    pub title: String,
    /// Opaque value posted back when the button is pressed.
    pub payload: String,
}
