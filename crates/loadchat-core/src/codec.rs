//! Frame codec.
//!
//! Encoding is plain serde. Decoding reshapes whatever the server sent into
//! a [`NormalizedEvent`]:
//!
//! - text that is not JSON, or JSON that is not an object, becomes an
//!   untyped [`GenericEvent`] carrying the value as `message`
//! - `connection_established` becomes [`ConnectionEstablished`]
//! - an envelope whose `message` is an object becomes a [`ChatMessage`]
//!   built from that nested object
//! - anything else becomes a [`GenericEvent`] with the envelope's fields

use crate::event::{
    ConnectionEstablished, GenericEvent, InboundEvent, NormalizedEvent, lenient_id, lenient_text,
};
use crate::{ChatMessage, EventKind, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialize an outbound frame to its wire text.
pub fn encode<T: Serialize + ?Sized>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Normalize one inbound text frame.
///
/// Fields are read leniently, so in practice every frame normalizes; an
/// error is only possible if serde itself rejects the value tree. Callers
/// drop such frames, there is no redelivery to wait for.
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    let mut envelope = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return Ok(untyped(other)),
        Err(_) => return Ok(untyped(Value::String(raw.to_string()))),
    };

    let tag = envelope
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    if tag.as_deref() == Some(EventKind::ConnectionEstablished.as_str()) {
        let handshake: Handshake =
            serde_json::from_value(Value::Object(envelope)).map_err(|source| DecodeError {
                tag: tag.clone(),
                source,
            })?;
        return Ok(InboundEvent {
            event: NormalizedEvent::ConnectionEstablished(ConnectionEstablished {
                kind: EventKind::ConnectionEstablished.as_str().to_string(),
                message: handshake.message,
                user: handshake.user_id,
                load_id: handshake.load_id,
            }),
            tag,
        });
    }

    match envelope.remove("message") {
        Some(nested @ Value::Object(_)) => {
            let message: ChatMessage =
                serde_json::from_value(nested).map_err(|source| DecodeError {
                    tag: tag.clone(),
                    source,
                })?;
            Ok(InboundEvent {
                tag,
                event: NormalizedEvent::ChatMessage(message),
            })
        }
        message => {
            // A non-string `type` is not a tag, but it must not reappear
            // through `fields` either.
            envelope.remove("type");
            Ok(InboundEvent {
                event: NormalizedEvent::Generic(GenericEvent {
                    kind: tag.clone(),
                    message,
                    fields: envelope,
                }),
                tag,
            })
        }
    }
}

/// Error shaping an inbound frame.
#[derive(Debug, thiserror::Error)]
#[error("cannot normalize {} frame: {source}", tag.as_deref().unwrap_or("untyped"))]
pub struct DecodeError {
    tag: Option<String>,
    #[source]
    source: serde_json::Error,
}

impl DecodeError {
    /// Envelope tag of the rejected frame.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct Handshake {
    #[serde(deserialize_with = "lenient_text")]
    message: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    user_id: Option<RecordId>,
    #[serde(deserialize_with = "lenient_id")]
    load_id: Option<RecordId>,
}

fn untyped(message: Value) -> InboundEvent {
    InboundEvent {
        tag: None,
        event: NormalizedEvent::Generic(GenericEvent {
            kind: None,
            message: Some(message),
            fields: Map::new(),
        }),
    }
}
