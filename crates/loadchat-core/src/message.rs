//! Protocol messages.
//!
//! Outbound frames are deliberately minimal: plain text is `{"message": ..}`
//! and everything else is `{"type": .., "payload": {..}}`. Inbound frames are
//! richer and are shaped by [`crate::decode`].

use crate::{ChannelIdentity, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound event tags a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    MessageUpdated,
    MessageDeleted,
    UserTyping,
    UserStoppedTyping,
    ConnectionEstablished,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        Self::NewMessage,
        Self::MessageUpdated,
        Self::MessageDeleted,
        Self::UserTyping,
        Self::UserStoppedTyping,
        Self::ConnectionEstablished,
    ];

    /// The wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageUpdated => "message_updated",
            Self::MessageDeleted => "message_deleted",
            Self::UserTyping => "user_typing",
            Self::UserStoppedTyping => "user_stopped_typing",
            Self::ConnectionEstablished => "connection_established",
        }
    }

    /// Look up a wire tag. Unrecognized tags have no kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control frame kinds the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    JoinRoom,
    LeaveRoom,
    Typing,
    StoppedTyping,
    UpdateMessage,
    DeleteMessage,
    FileMessageSent,
}

/// Payload of a control frame.
///
/// Variants are tried in declaration order when parsing, so the ones with
/// more required fields come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlPayload {
    /// An uploaded attachment is ready.
    #[serde(rename_all = "camelCase")]
    Attachment {
        message_id: RecordId,
        conversation_id: RecordId,
        user_id: RecordId,
    },
    /// A message body was edited.
    #[serde(rename_all = "camelCase")]
    Edit { message_id: RecordId, message: String },
    /// Room membership and typing notices.
    #[serde(rename_all = "camelCase")]
    Presence {
        conversation_id: RecordId,
        user_id: RecordId,
    },
    /// A message was removed.
    #[serde(rename_all = "camelCase")]
    Removal { message_id: RecordId },
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Plain chat text.
    Text { message: String },
    /// A typed control frame.
    Control {
        #[serde(rename = "type")]
        kind: ControlKind,
        payload: ControlPayload,
    },
}

impl OutboundFrame {
    /// Plain chat text.
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text {
            message: message.into(),
        }
    }

    /// Presence in `identity`'s conversation.
    pub fn join_room(identity: &ChannelIdentity) -> Self {
        Self::presence(ControlKind::JoinRoom, identity)
    }

    /// Leaving `identity`'s conversation.
    pub fn leave_room(identity: &ChannelIdentity) -> Self {
        Self::presence(ControlKind::LeaveRoom, identity)
    }

    /// `identity`'s user started typing.
    pub fn typing(identity: &ChannelIdentity) -> Self {
        Self::presence(ControlKind::Typing, identity)
    }

    /// `identity`'s user stopped typing.
    pub fn stopped_typing(identity: &ChannelIdentity) -> Self {
        Self::presence(ControlKind::StoppedTyping, identity)
    }

    /// New body for an existing message.
    pub fn update_message(message_id: impl Into<RecordId>, message: impl Into<String>) -> Self {
        Self::Control {
            kind: ControlKind::UpdateMessage,
            payload: ControlPayload::Edit {
                message_id: message_id.into(),
                message: message.into(),
            },
        }
    }

    /// Removal of an existing message.
    pub fn delete_message(message_id: impl Into<RecordId>) -> Self {
        Self::Control {
            kind: ControlKind::DeleteMessage,
            payload: ControlPayload::Removal {
                message_id: message_id.into(),
            },
        }
    }

    /// Announce an attachment that was uploaded over HTTP.
    pub fn file_message_sent(
        message_id: RecordId,
        conversation_id: RecordId,
        user_id: RecordId,
    ) -> Self {
        Self::Control {
            kind: ControlKind::FileMessageSent,
            payload: ControlPayload::Attachment {
                message_id,
                conversation_id,
                user_id,
            },
        }
    }

    fn presence(kind: ControlKind, identity: &ChannelIdentity) -> Self {
        Self::Control {
            kind,
            payload: ControlPayload::Presence {
                conversation_id: identity.conversation_id().clone(),
                user_id: identity.user_id().clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_frame_is_bare_message() {
        let value = serde_json::to_value(OutboundFrame::text("on my way")).unwrap();
        assert_eq!(value, json!({ "message": "on my way" }));
    }

    #[test]
    fn control_frames_carry_type_and_payload() {
        let identity = ChannelIdentity::new(3, 42);
        let value = serde_json::to_value(OutboundFrame::typing(&identity)).unwrap();
        assert_eq!(
            value,
            json!({ "type": "typing", "payload": { "conversationId": 42, "userId": 3 } })
        );

        let value = serde_json::to_value(OutboundFrame::delete_message(9)).unwrap();
        assert_eq!(
            value,
            json!({ "type": "delete_message", "payload": { "messageId": 9 } })
        );
    }

    #[test]
    fn server_side_parse_picks_matching_payload() {
        let frame: OutboundFrame = serde_json::from_value(json!({
            "type": "update_message",
            "payload": { "messageId": 5, "message": "eta 3pm" }
        }))
        .unwrap();
        assert_eq!(frame, OutboundFrame::update_message(5, "eta 3pm"));

        let frame: OutboundFrame = serde_json::from_value(json!({
            "type": "join_room",
            "payload": { "conversationId": 42, "userId": 3 }
        }))
        .unwrap();
        assert_eq!(frame, OutboundFrame::join_room(&ChannelIdentity::new(3, 42)));
    }

    #[test]
    fn event_kind_tags() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_tag("file_message_sent"), None);
    }
}
