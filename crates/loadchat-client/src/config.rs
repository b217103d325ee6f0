//! Channel configuration.
//!
//! Loaded from TOML; every field has a default so a file only needs the
//! endpoints that differ from a local development server.

use crate::error::ConfigError;
use crate::reconnect::{CloseCodePolicy, ReconnectPolicy};
use loadchat_core::ChannelIdentity;
use serde::Deserialize;
use std::path::Path;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default attachment upload timeout in milliseconds.
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;

/// Endpoints, timeouts and reconnect behavior for a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Scheme and host of the chat socket, e.g. `wss://chat.example.com`.
    pub ws_base: String,
    /// Scheme and host of the REST API that accepts attachments.
    pub api_base: String,
    /// Bearer token for the attachment endpoint.
    pub auth_token: Option<String>,
    pub connect_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub close_codes: CloseCodePolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_base: "ws://127.0.0.1:8001".to_string(),
            api_base: "http://127.0.0.1:8000".to_string(),
            auth_token: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            reconnect: ReconnectPolicy::default(),
            close_codes: CloseCodePolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Defaults with the given socket and API endpoints.
    pub fn new(ws_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    /// Send `token` as a bearer token on uploads.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Replace the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the close code classification.
    pub fn with_close_codes(mut self, close_codes: CloseCodePolicy) -> Self {
        self.close_codes = close_codes;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the channel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_base.trim().is_empty() {
            return Err(ConfigError::Invalid("ws_base must not be empty".into()));
        }
        let policy = &self.reconnect;
        if policy.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms must be positive".into(),
            ));
        }
        if policy.cap_delay_ms < policy.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect.cap_delay_ms ({}) is below base_delay_ms ({})",
                policy.cap_delay_ms, policy.base_delay_ms
            )));
        }
        if !(policy.multiplier >= 1.0 && policy.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "reconnect.multiplier must be a finite value >= 1.0, got {}",
                policy.multiplier
            )));
        }
        if self.close_codes.permanent.contains(&self.close_codes.normal) {
            return Err(ConfigError::Invalid(format!(
                "close code {} cannot be both normal and permanent",
                self.close_codes.normal
            )));
        }
        Ok(())
    }

    /// Socket URL for one identity: `{ws_base}/ws/chat/{user}/{conversation}/`.
    pub fn socket_url(&self, identity: &ChannelIdentity) -> String {
        format!(
            "{}{}",
            self.ws_base.trim_end_matches('/'),
            identity.socket_path()
        )
    }

    /// Attachment endpoint: `{api_base}/api/chat/`.
    pub fn upload_url(&self) -> String {
        format!("{}/api/chat/", self.api_base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ChannelConfig::from_toml_str("").unwrap();
        assert_eq!(config, ChannelConfig::default());
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.close_codes.permanent, vec![1006]);
    }

    #[test]
    fn full_document() {
        let config = ChannelConfig::from_toml_str(
            r#"
            ws_base = "wss://chat.example.com/"
            api_base = "https://api.example.com"
            auth_token = "secret"
            connect_timeout_ms = 2500

            [reconnect]
            base_delay_ms = 500
            cap_delay_ms = 8000
            multiplier = 2.0
            max_attempts = 7

            [close_codes]
            normal = 1000
            permanent = [1006, 4403]
            "#,
        )
        .unwrap();

        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.upload_timeout_ms, DEFAULT_UPLOAD_TIMEOUT_MS);
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.close_codes.permanent, vec![1006, 4403]);

        let identity = ChannelIdentity::new(3, 42);
        assert_eq!(
            config.socket_url(&identity),
            "wss://chat.example.com/ws/chat/3/42/"
        );
        assert_eq!(config.upload_url(), "https://api.example.com/api/chat/");
    }

    #[test]
    fn rejects_bad_policies() {
        assert_matches!(
            ChannelConfig::from_toml_str("[reconnect]\nmultiplier = 0.5"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ChannelConfig::from_toml_str("[reconnect]\nbase_delay_ms = 9000\ncap_delay_ms = 10"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ChannelConfig::from_toml_str("ws_base = \"\""),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ChannelConfig::from_toml_str("[close_codes]\npermanent = [1000]"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ChannelConfig::from_toml_str("connect_timeout_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.toml");
        std::fs::write(&path, "ws_base = \"ws://10.0.0.5:9000\"\n").unwrap();
        let config = ChannelConfig::load(&path).unwrap();
        assert_eq!(config.ws_base, "ws://10.0.0.5:9000");

        assert_matches!(
            ChannelConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        );
    }
}
