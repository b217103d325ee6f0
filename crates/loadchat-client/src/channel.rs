//! The real-time channel.
//!
//! One [`RealtimeChannel`] owns at most one WebSocket at a time. The socket is
//! split into a reader task, which decodes frames and dispatches them, and a
//! writer task fed by an unbounded queue, so `send` never waits on the
//! network. Every transport gets a generation number; a closure or handshake
//! from an older generation is ignored, which keeps a deliberate disconnect
//! from being undone by a late callback.

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::reconnect::{Backoff, CloseDisposition};
use crate::registry::DispatchRegistry;
use crate::upload::{Attachment, Uploader, resource_id};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use loadchat_core::{
    ChannelIdentity, ConnectionState, EventKind, NormalizedEvent, OutboundFrame, RecordId,
    close_code, decode, encode,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A reconnecting chat connection for one `(user, conversation)` at a time.
///
/// Dropping the channel disconnects it.
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    registry: DispatchRegistry,
    uploader: Uploader,
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
}

/// Everything the connection manager mutates. Never held across an await.
struct Slot {
    identity: Option<ChannelIdentity>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Caller,
    Retry,
}

impl RealtimeChannel {
    /// Build an idle channel with its own handler registry.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_registry(config, DispatchRegistry::new())
    }

    /// Build a channel that dispatches into an existing registry.
    pub fn with_registry(config: ChannelConfig, registry: DispatchRegistry) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let slot = Slot {
            identity: None,
            generation: 0,
            outbound: None,
            reader: None,
            retry: None,
            backoff: Backoff::new(config.reconnect.clone()),
        };
        Self {
            inner: Arc::new(Inner {
                uploader: Uploader::new(&config),
                config,
                registry,
                slot: Mutex::new(slot),
                state,
            }),
        }
    }

    /// The configuration the channel was built with.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// The registry inbound events are dispatched into.
    pub fn registry(&self) -> &DispatchRegistry {
        &self.inner.registry
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether frames can be sent right now.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Identity of the current or most recent transport.
    pub fn identity(&self) -> Option<ChannelIdentity> {
        self.inner.slot.lock().identity.clone()
    }

    /// Observe every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Open the socket for `identity`.
    ///
    /// Resolves once the socket is open. Already being open for the same
    /// identity is a success that opens nothing. A failure here is reported
    /// and not retried; automatic reconnects only follow the loss of a socket
    /// that was open.
    pub async fn connect(&self, identity: ChannelIdentity) -> Result<(), ChannelError> {
        Arc::clone(&self.inner).open(identity, Trigger::Caller).await
    }

    /// Close the socket with a normal closure and cancel any pending
    /// reconnect. A no-op when nothing is live.
    pub fn disconnect(&self) {
        self.inner.shutdown();
    }

    /// Queue any serializable value as one text frame.
    pub fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), ChannelError> {
        self.inner.send(frame)
    }

    /// Send chat text as `{"message": text}`.
    pub fn send_message(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send(&OutboundFrame::text(text))
    }

    /// Announce presence in the current conversation.
    pub fn join_room(&self) -> Result<(), ChannelError> {
        let identity = self.open_identity()?;
        self.send(&OutboundFrame::join_room(&identity))
    }

    /// Announce leaving the current conversation.
    pub fn leave_room(&self) -> Result<(), ChannelError> {
        let identity = self.open_identity()?;
        self.send(&OutboundFrame::leave_room(&identity))
    }

    /// Tell the conversation this user started typing.
    pub fn start_typing(&self) -> Result<(), ChannelError> {
        let identity = self.open_identity()?;
        self.send(&OutboundFrame::typing(&identity))
    }

    /// Tell the conversation this user stopped typing.
    pub fn stop_typing(&self) -> Result<(), ChannelError> {
        let identity = self.open_identity()?;
        self.send(&OutboundFrame::stopped_typing(&identity))
    }

    /// Replace the body of an existing message.
    pub fn update_message(
        &self,
        message_id: impl Into<RecordId>,
        text: impl Into<String>,
    ) -> Result<(), ChannelError> {
        self.send(&OutboundFrame::update_message(message_id, text))
    }

    /// Remove an existing message.
    pub fn delete_message(&self, message_id: impl Into<RecordId>) -> Result<(), ChannelError> {
        self.send(&OutboundFrame::delete_message(message_id))
    }

    /// Upload an attachment over HTTP, then announce it on the socket.
    ///
    /// Resolves with the upload response body. Nothing is announced unless
    /// the response carries a resource id.
    pub async fn send_file(
        &self,
        attachment: Attachment,
        message: &str,
        conversation_id: impl Into<RecordId>,
        user_id: impl Into<RecordId>,
    ) -> Result<Value, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelNotOpen);
        }
        let conversation_id = conversation_id.into();
        let user_id = user_id.into();
        let file_name = attachment.file_name().to_string();

        let body = self
            .inner
            .uploader
            .upload(attachment, message, &conversation_id, &user_id)
            .await?;
        let message_id = resource_id(&body).ok_or_else(|| {
            ChannelError::UploadFailed("response carried no resource id".to_string())
        })?;

        info!(%file_name, %message_id, "attachment stored");
        self.send(&OutboundFrame::file_message_sent(
            message_id,
            conversation_id,
            user_id,
        ))?;
        Ok(body)
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.inner.registry.on(kind, handler);
    }

    /// Handle `new_message` events.
    pub fn on_new_message<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::NewMessage, handler);
    }

    /// Handle `message_updated` events.
    pub fn on_message_updated<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::MessageUpdated, handler);
    }

    /// Handle `message_deleted` events.
    pub fn on_message_deleted<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::MessageDeleted, handler);
    }

    /// Handle `user_typing` events.
    pub fn on_user_typing<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::UserTyping, handler);
    }

    /// Handle `user_stopped_typing` events.
    pub fn on_user_stopped_typing<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::UserStoppedTyping, handler);
    }

    /// Handle the server greeting.
    pub fn on_connection_established<F>(&self, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::ConnectionEstablished, handler);
    }

    /// Drop every registered handler.
    pub fn reset_handlers(&self) {
        self.inner.registry.reset();
    }

    fn open_identity(&self) -> Result<ChannelIdentity, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelNotOpen);
        }
        self.identity().ok_or(ChannelError::ChannelNotOpen)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "connection state changed");
        }
    }

    // Boxed so the reconnect task, which calls back into `open`, has a
    // nameable future type.
    fn open(
        self: Arc<Self>,
        identity: ChannelIdentity,
        trigger: Trigger,
    ) -> BoxFuture<'static, Result<(), ChannelError>> {
        async move {
            let generation = {
                let mut slot = self.slot.lock();
                let current = *self.state.borrow();
                match current {
                    ConnectionState::Open if slot.identity.as_ref() == Some(&identity) => {
                        debug!(%identity, "already open");
                        return Ok(());
                    }
                    ConnectionState::Connecting => return Err(ChannelError::ConnectInProgress),
                    ConnectionState::Retrying { .. } => {}
                    _ if trigger == Trigger::Retry => return Err(ChannelError::Aborted),
                    _ => {}
                }

                match trigger {
                    Trigger::Caller => {
                        if let Some(retry) = slot.retry.take() {
                            retry.abort();
                        }
                    }
                    // The handle belongs to the task running this attempt.
                    Trigger::Retry => slot.retry = None,
                }
                if let Some(outbound) = slot.outbound.take() {
                    info!(previous = ?slot.identity, %identity, "switching conversation");
                    let _ = outbound.send(normal_close());
                }
                if let Some(reader) = slot.reader.take() {
                    reader.abort();
                }

                slot.generation += 1;
                slot.identity = Some(identity.clone());
                self.set_state(ConnectionState::Connecting);
                slot.generation
            };

            let url = self.config.socket_url(&identity);
            let limit = Duration::from_millis(self.config.connect_timeout_ms);
            let outcome =
                match tokio::time::timeout(limit, tokio_tungstenite::connect_async(url.as_str()))
                    .await
                {
                    Ok(Ok((ws, _response))) => Ok(ws),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "handshake timed out after {}ms",
                        self.config.connect_timeout_ms
                    )),
                };

            let mut slot = self.slot.lock();
            if slot.generation != generation {
                debug!(%url, "handshake finished after the attempt was superseded");
                return Err(ChannelError::Aborted);
            }

            match outcome {
                Ok(ws) => {
                    let (sink, stream) = ws.split();
                    let (outbound, queue) = mpsc::unbounded_channel();
                    tokio::spawn(write_loop(sink, queue));
                    slot.reader = Some(tokio::spawn(
                        Arc::clone(&self).read_loop(stream, generation),
                    ));
                    slot.outbound = Some(outbound);
                    slot.backoff.reset();
                    self.set_state(ConnectionState::Open);
                    info!(%url, "channel open");
                    Ok(())
                }
                Err(reason) => {
                    match trigger {
                        Trigger::Caller => {
                            warn!(%url, %reason, "connect failed");
                            self.set_state(ConnectionState::Closed {
                                code: close_code::ABNORMAL,
                                was_clean: false,
                            });
                        }
                        Trigger::Retry => {
                            warn!(%url, %reason, "reconnect attempt failed");
                            self.schedule_retry(&mut slot, close_code::ABNORMAL, false);
                        }
                    }
                    Err(ChannelError::TransportUnavailable { url, reason })
                }
            }
        }
        .boxed()
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>, generation: u64) {
        let mut code = close_code::ABNORMAL;
        let mut was_clean = false;

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.deliver(text.as_str()),
                Ok(Message::Close(frame)) => {
                    code = frame.map_or(close_code::NO_STATUS, |f| u16::from(f.code));
                    was_clean = true;
                    break;
                }
                Ok(Message::Binary(bytes)) => {
                    debug!(len = bytes.len(), "ignoring binary frame");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "transport error");
                    break;
                }
            }
        }

        self.on_closed(generation, code, was_clean);
    }

    fn deliver(&self, raw: &str) {
        match decode(raw) {
            Ok(event) => {
                if !self.registry.dispatch(&event) {
                    debug!(tag = ?event.tag, "no handler registered, dropping frame");
                }
            }
            Err(e) => debug!(error = %e, "dropping undecodable frame"),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: u16, was_clean: bool) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        slot.outbound = None;
        slot.reader = None;

        match self.config.close_codes.classify(code) {
            CloseDisposition::Normal => {
                info!(code, "channel closed");
                self.set_state(ConnectionState::Closed { code, was_clean });
            }
            CloseDisposition::Permanent => {
                warn!(code, "channel closed without a handshake, not reconnecting");
                self.set_state(ConnectionState::Closed { code, was_clean });
            }
            CloseDisposition::Retry => self.schedule_retry(&mut slot, code, was_clean),
        }
    }

    fn schedule_retry(self: &Arc<Self>, slot: &mut Slot, code: u16, was_clean: bool) {
        let Some(identity) = slot.identity.clone() else {
            self.set_state(ConnectionState::Closed { code, was_clean });
            return;
        };

        match slot.backoff.next_delay() {
            Some((attempt, delay)) => {
                info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    code,
                    "scheduling reconnect"
                );
                self.set_state(ConnectionState::Retrying { attempt });
                let inner = Arc::clone(self);
                slot.retry = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = inner.open(identity, Trigger::Retry).await {
                        debug!(error = %e, "reconnect attempt did not open");
                    }
                }));
            }
            None => {
                warn!(
                    attempts = slot.backoff.attempts(),
                    code, "reconnect attempts exhausted"
                );
                self.set_state(ConnectionState::Closed { code, was_clean });
            }
        }
    }

    fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), ChannelError> {
        let slot = self.slot.lock();
        let outbound = match (*self.state.borrow(), slot.outbound.as_ref()) {
            (ConnectionState::Open, Some(outbound)) => outbound,
            _ => return Err(ChannelError::ChannelNotOpen),
        };
        let text = encode(frame)?;
        let len = text.len();
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ChannelError::ChannelNotOpen)?;
        debug!(len, "frame queued");
        Ok(())
    }

    fn shutdown(&self) {
        let mut slot = self.slot.lock();
        if let Some(retry) = slot.retry.take() {
            retry.abort();
        }
        if let Some(reader) = slot.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = slot.outbound.take() {
            let _ = outbound.send(normal_close());
        }
        slot.generation += 1;

        let active = self.state.borrow().is_active();
        if active {
            info!(identity = ?slot.identity, "channel disconnected");
            self.set_state(ConnectionState::Closed {
                code: close_code::NORMAL,
                was_clean: true,
            });
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "write failed");
            return;
        }
        if closing {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "closing socket");
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    }))
}
