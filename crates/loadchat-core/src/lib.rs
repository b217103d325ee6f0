//! Core types for loadchat.
//!
//! This crate provides the wire primitives of the real-time chat channel:
//! identities, outbound frames, normalized inbound events and the codec
//! between them. It performs no I/O; `loadchat-client` owns the transport.

mod codec;
mod event;
mod identity;
mod message;

pub use codec::{DecodeError, decode, encode};
pub use event::{ChatMessage, ConnectionEstablished, GenericEvent, InboundEvent, NormalizedEvent};
pub use identity::{ChannelIdentity, IdentityParseError, RecordId};
pub use message::{ControlKind, ControlPayload, EventKind, OutboundFrame};

/// WebSocket close codes the channel reasons about.
pub mod close_code {
    /// Deliberate shutdown by either side.
    pub const NORMAL: u16 = 1000;
    /// A close frame arrived without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// The connection dropped without a closing handshake.
    pub const ABNORMAL: u16 = 1006;
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Constructed, never connected.
    #[default]
    Idle,
    /// Opening a transport.
    Connecting,
    /// Transport open; sends are permitted.
    Open,
    /// No transport and no reconnect pending.
    Closed { code: u16, was_clean: bool },
    /// Waiting to run reconnect attempt `attempt` (1-indexed).
    Retrying { attempt: u32 },
}

impl ConnectionState {
    /// Whether outbound frames may be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a transport exists or is about to.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Retrying { .. })
    }
}
