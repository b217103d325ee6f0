//! Client side of the loadchat real-time channel.
//!
//! [`RealtimeChannel`] keeps one WebSocket open per `(user, conversation)`,
//! reconnects with capped exponential backoff after unexpected drops, decodes
//! inbound frames and hands them to the handler registered for their type.
//! Attachments travel over HTTP and are announced on the socket afterwards.

mod channel;
mod config;
mod error;
mod reconnect;
mod registry;
mod upload;

pub use channel::RealtimeChannel;
pub use config::ChannelConfig;
pub use error::{ChannelError, ConfigError};
pub use reconnect::{Backoff, CloseCodePolicy, CloseDisposition, ReconnectPolicy};
pub use registry::{DispatchRegistry, Handler};
pub use upload::Attachment;

pub use loadchat_core::{
    ChannelIdentity, ChatMessage, ConnectionEstablished, ConnectionState, EventKind, GenericEvent,
    InboundEvent, NormalizedEvent, OutboundFrame, RecordId,
};
