//! Frames the development server sends.

use loadchat_core::{ChannelIdentity, RecordId};
use serde::Serialize;

/// Server to client frames, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    ConnectionEstablished {
        message: String,
        user_id: RecordId,
        load_id: RecordId,
    },
    NewMessage {
        message: StoredMessage,
    },
    MessageUpdated {
        message: StoredMessage,
    },
    MessageDeleted {
        message_id: RecordId,
    },
    UserTyping {
        user_id: RecordId,
    },
    UserStoppedTyping {
        user_id: RecordId,
    },
}

/// A message as the server keeps it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub user_id: RecordId,
    pub created_at: String,
}

/// Parse `/ws/chat/{user}/{conversation}/`.
pub fn parse_socket_path(path: &str) -> Option<ChannelIdentity> {
    path.strip_prefix("/ws/chat/")?
        .trim_end_matches('/')
        .parse()
        .ok()
}
