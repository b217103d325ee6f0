//! Development chat server.

use crate::protocol::{ServerEnvelope, StoredMessage, parse_socket_path};
use futures_util::{SinkExt, StreamExt};
use loadchat_core::{ChannelIdentity, ControlKind, ControlPayload, OutboundFrame, RecordId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

const HISTORY_LIMIT: usize = 100;

/// Shared server state.
#[derive(Default)]
struct ServerState {
    rooms: HashMap<RecordId, broadcast::Sender<String>>,
    messages: HashMap<RecordId, Vec<StoredMessage>>,
    next_id: i64,
}

impl ServerState {
    fn room(&mut self, conversation: &RecordId) -> broadcast::Sender<String> {
        self.rooms
            .entry(conversation.clone())
            .or_insert_with(|| broadcast::channel(100).0)
            .clone()
    }

    fn prune_rooms(&mut self) {
        self.rooms.retain(|_, room| room.receiver_count() > 0);
    }

    /// Apply one client frame; returns what to broadcast to the room.
    fn apply(&mut self, sender: &ChannelIdentity, frame: OutboundFrame) -> Option<ServerEnvelope> {
        let conversation = sender.conversation_id().clone();
        let user_id = sender.user_id().clone();
        match frame {
            OutboundFrame::Text { message } => {
                let stored = self.store(&conversation, user_id, message);
                Some(ServerEnvelope::NewMessage { message: stored })
            }
            OutboundFrame::Control { kind, payload } => match (kind, payload) {
                (ControlKind::Typing, _) => Some(ServerEnvelope::UserTyping { user_id }),
                (ControlKind::StoppedTyping, _) => {
                    Some(ServerEnvelope::UserStoppedTyping { user_id })
                }
                (ControlKind::UpdateMessage, ControlPayload::Edit { message_id, message }) => {
                    let stored = self
                        .messages
                        .get_mut(&conversation)?
                        .iter_mut()
                        .find(|m| m.id == message_id)?;
                    stored.message = message;
                    Some(ServerEnvelope::MessageUpdated {
                        message: stored.clone(),
                    })
                }
                (ControlKind::DeleteMessage, ControlPayload::Removal { message_id }) => {
                    let history = self.messages.get_mut(&conversation)?;
                    let before = history.len();
                    history.retain(|m| m.id != message_id);
                    (history.len() != before)
                        .then_some(ServerEnvelope::MessageDeleted { message_id })
                }
                (ControlKind::FileMessageSent, ControlPayload::Attachment { message_id, .. }) => {
                    let stored = StoredMessage {
                        id: message_id,
                        kind: "file".to_string(),
                        message: String::new(),
                        user_id,
                        created_at: now(),
                    };
                    self.push(&conversation, stored.clone());
                    Some(ServerEnvelope::NewMessage { message: stored })
                }
                (ControlKind::JoinRoom | ControlKind::LeaveRoom, _) => None,
                (kind, payload) => {
                    tracing::warn!(?kind, ?payload, "control frame with mismatched payload");
                    None
                }
            },
        }
    }

    fn store(&mut self, conversation: &RecordId, user_id: RecordId, message: String) -> StoredMessage {
        self.next_id += 1;
        let stored = StoredMessage {
            id: RecordId::Int(self.next_id),
            kind: "text".to_string(),
            message,
            user_id,
            created_at: now(),
        };
        self.push(conversation, stored.clone());
        stored
    }

    fn push(&mut self, conversation: &RecordId, stored: StoredMessage) {
        let history = self.messages.entry(conversation.clone()).or_default();
        history.push(stored);
        if history.len() > HISTORY_LIMIT {
            history.remove(0);
        }
    }
}

type SharedState = Arc<RwLock<ServerState>>;

fn now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let state = SharedState::default();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, state).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
) -> anyhow::Result<()> {
    let mut identity = None;
    let callback = |req: &Request, resp: Response| match parse_socket_path(req.uri().path()) {
        Some(parsed) => {
            identity = Some(parsed);
            Ok(resp)
        }
        None => {
            let mut rejected = ErrorResponse::new(Some("unknown path".to_string()));
            *rejected.status_mut() = StatusCode::NOT_FOUND;
            Err(rejected)
        }
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some(identity) = identity else {
        return Ok(());
    };
    let (mut sink, mut stream) = ws.split();
    tracing::debug!(%identity, "New connection from {}", addr);

    let conversation = identity.conversation_id().clone();
    let room = state.write().await.room(&conversation);
    let mut room_rx = room.subscribe();

    let greeting = ServerEnvelope::ConnectionEstablished {
        message: format!("Connected to load {conversation}"),
        user_id: identity.user_id().clone(),
        load_id: conversation.clone(),
    };
    sink.send(Message::Text(serde_json::to_string(&greeting)?.into()))
        .await?;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let frame: OutboundFrame = match serde_json::from_str(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!("Invalid frame: {}", e);
                                continue;
                            }
                        };
                        let reply = state.write().await.apply(&identity, frame);
                        if let Some(reply) = reply {
                            let _ = room.send(serde_json::to_string(&reply)?);
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            msg = room_rx.recv() => match msg {
                Ok(text) => sink.send(Message::Text(text.into())).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "slow client, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    drop(room_rx);
    state.write().await.prune_rooms();
    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> ChannelIdentity {
        ChannelIdentity::new(3, 42)
    }

    fn post(state: &mut ServerState, text: &str) -> StoredMessage {
        match state.apply(&sender(), OutboundFrame::text(text)) {
            Some(ServerEnvelope::NewMessage { message }) => message,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_is_stored_with_increasing_ids() {
        let mut state = ServerState::default();
        let first = post(&mut state, "at the gate");
        let second = post(&mut state, "loading now");
        assert_eq!(first.id, RecordId::Int(1));
        assert_eq!(second.id, RecordId::Int(2));
        assert_eq!(second.user_id, RecordId::Int(3));
        assert_eq!(state.messages[&RecordId::Int(42)].len(), 2);
    }

    #[test]
    fn edits_and_deletes_apply_to_known_messages() {
        let mut state = ServerState::default();
        let posted = post(&mut state, "eta 2pm");

        let edited = state.apply(&sender(), OutboundFrame::update_message(posted.id.clone(), "eta 3pm"));
        assert!(matches!(
            edited,
            Some(ServerEnvelope::MessageUpdated { ref message }) if message.message == "eta 3pm"
        ));

        assert!(state.apply(&sender(), OutboundFrame::delete_message(99)).is_none());
        assert!(matches!(
            state.apply(&sender(), OutboundFrame::delete_message(posted.id)),
            Some(ServerEnvelope::MessageDeleted { .. })
        ));
        assert!(state.messages[&RecordId::Int(42)].is_empty());
    }

    #[test]
    fn presence_frames() {
        let mut state = ServerState::default();
        let me = sender();
        assert!(matches!(
            state.apply(&me, OutboundFrame::typing(&me)),
            Some(ServerEnvelope::UserTyping { user_id: RecordId::Int(3) })
        ));
        assert!(matches!(
            state.apply(&me, OutboundFrame::stopped_typing(&me)),
            Some(ServerEnvelope::UserStoppedTyping { .. })
        ));
        assert!(state.apply(&me, OutboundFrame::join_room(&me)).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut state = ServerState::default();
        for i in 0..HISTORY_LIMIT + 5 {
            post(&mut state, &format!("update {i}"));
        }
        let history = &state.messages[&RecordId::Int(42)];
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].id, RecordId::Int(6));
    }
}
