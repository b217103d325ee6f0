//! Normalized inbound events.
//!
//! The server's frames come in several shapes. Handlers only ever see one of
//! the three structs below, which keeps wire quirks out of the UI.

use crate::{EventKind, RecordId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A decoded inbound frame: the envelope tag it arrived under, plus its
/// normalized payload.
///
/// The tag is kept separately because a [`ChatMessage`] carries the nested
/// message's own `type` (for example `"text"` or `"file"`), not the
/// envelope's.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub tag: Option<String>,
    pub event: NormalizedEvent,
}

impl InboundEvent {
    /// The handler slot this event is delivered to, if any.
    pub fn kind(&self) -> Option<EventKind> {
        self.tag.as_deref().and_then(EventKind::from_tag)
    }
}

/// The payload delivered to handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedEvent {
    ConnectionEstablished(ConnectionEstablished),
    ChatMessage(ChatMessage),
    Generic(GenericEvent),
}

impl NormalizedEvent {
    /// The `type` field of the normalized payload.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::ConnectionEstablished(e) => Some(&e.kind),
            Self::ChatMessage(m) => m.kind.as_deref(),
            Self::Generic(g) => g.kind.as_deref(),
        }
    }

    /// The chat message, if this is one.
    pub fn as_chat_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::ChatMessage(m) => Some(m),
            _ => None,
        }
    }

    /// The pass-through event, if this is one.
    pub fn as_generic(&self) -> Option<&GenericEvent> {
        match self {
            Self::Generic(g) => Some(g),
            _ => None,
        }
    }
}

/// Server greeting sent right after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEstablished {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: Option<String>,
    pub user: Option<RecordId>,
    #[serde(rename = "loadId")]
    pub load_id: Option<RecordId>,
}

/// A chat message, read from the nested `message` object of an envelope.
///
/// Every field is read leniently: scalars are accepted as text, and a value
/// that cannot stand for an id or a text field becomes `None`. A message is
/// never rejected over one odd field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<RecordId>,
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub message: Option<String>,
    #[serde(rename(deserialize = "user_id"), deserialize_with = "lenient_id")]
    pub user: Option<RecordId>,
    #[serde(deserialize_with = "lenient_text")]
    pub user_email: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub file_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub file_name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub group_message_id: Option<RecordId>,
}

impl ChatMessage {
    /// Whether the message points at an uploaded file.
    pub fn has_attachment(&self) -> bool {
        self.file_url.is_some()
    }
}

/// Any other frame, passed through with all of its fields.
///
/// `fields` holds everything except `type` and `message`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GenericEvent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Text field that accepts any JSON value: strings as-is, other scalars and
/// containers as their JSON text, `null` as `None`.
pub(crate) fn lenient_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Id field that falls back to `None` for values no id can be read from.
pub(crate) fn lenient_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<RecordId>, D::Error> {
    Ok(RecordId::deserialize(Value::deserialize(deserializer)?).ok())
}

impl GenericEvent {
    /// Look up a field of the original envelope.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The `message` field as text, when it is a string.
    pub fn message_text(&self) -> Option<&str> {
        self.message.as_ref().and_then(Value::as_str)
    }
}
