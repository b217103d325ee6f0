//! Error types for the channel and its configuration.

use std::path::PathBuf;

/// Errors surfaced to callers of [`crate::RealtimeChannel`].
///
/// Inbound frames that cannot be decoded never show up here; they are
/// dropped and logged.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The caller's connect attempt did not reach an open socket.
    #[error("transport unavailable at {url}: {reason}")]
    TransportUnavailable { url: String, reason: String },
    /// A send or upload was attempted while the channel was not open.
    #[error("channel is not open")]
    ChannelNotOpen,
    /// The attachment upload failed or returned no resource id.
    #[error("upload failed: {0}")]
    UploadFailed(String),
    /// Another connect is still waiting for its handshake.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    /// `disconnect` ran while this attempt was still handshaking.
    #[error("connection attempt aborted by disconnect")]
    Aborted,
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors loading a [`crate::ChannelConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
