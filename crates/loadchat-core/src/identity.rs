//! Channel identity.
//!
//! Identity format: `user/conversation`
//!
//! Both halves are [`RecordId`]s. Text that is exactly the canonical form
//! of an integer is kept as an integer so the ids serialize as JSON numbers,
//! which is what the chat server stores. Anything else (`"007"`, `"+5"`)
//! stays text, so it names the same record on the way back out.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A server-side record id: an integer, or opaque text.
///
/// Deserializes from a JSON integer, an integral float such as `7.0`, or a
/// string; strings follow the same rule as `From<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// The integer value, if this id is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for RecordId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for RecordId {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        match s.parse::<i64>() {
            Ok(n) if n.to_string() == s => Self::Int(n),
            _ => Self::Text(s),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RecordIdVisitor)
    }
}

struct RecordIdVisitor;

impl Visitor<'_> for RecordIdVisitor {
    type Value = RecordId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a string id")
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<RecordId, E> {
        Ok(RecordId::Int(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<RecordId, E> {
        Ok(i64::try_from(n).map_or_else(|_| RecordId::Text(n.to_string()), RecordId::Int))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> Result<RecordId, E> {
        // i64::MAX as f64 rounds up to 2^63, which is already out of range.
        if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
            Ok(RecordId::Int(n as i64))
        } else {
            Ok(RecordId::Text(n.to_string()))
        }
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<RecordId, E> {
        Ok(RecordId::from(s))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<RecordId, E> {
        Ok(RecordId::from(s))
    }
}

/// The `(user, conversation)` pair one transport is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelIdentity {
    user_id: RecordId,
    conversation_id: RecordId,
}

impl ChannelIdentity {
    /// Create a new identity.
    pub fn new(user_id: impl Into<RecordId>, conversation_id: impl Into<RecordId>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// The connecting user.
    pub fn user_id(&self) -> &RecordId {
        &self.user_id
    }

    /// The conversation (load) the user is chatting in.
    pub fn conversation_id(&self) -> &RecordId {
        &self.conversation_id
    }

    /// Path of the chat socket for this identity, with the trailing slash
    /// the server routes on.
    pub fn socket_path(&self) -> String {
        format!("/ws/chat/{}/{}/", self.user_id, self.conversation_id)
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.conversation_id)
    }
}

impl FromStr for ChannelIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, conversation) = s
            .split_once('/')
            .ok_or_else(|| IdentityParseError::MissingSeparator(s.to_string()))?;

        if user.is_empty() || conversation.is_empty() {
            return Err(IdentityParseError::EmptyComponent(s.to_string()));
        }
        if conversation.contains('/') {
            return Err(IdentityParseError::TooManyComponents(s.to_string()));
        }

        Ok(Self::new(user, conversation))
    }
}

impl TryFrom<String> for ChannelIdentity {
    type Error = IdentityParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ChannelIdentity> for String {
    fn from(id: ChannelIdentity) -> Self {
        id.to_string()
    }
}

/// Error parsing an identity string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityParseError {
    #[error("identity must look like 'user/conversation', got: {0}")]
    MissingSeparator(String),
    #[error("identity has an empty user or conversation: {0}")]
    EmptyComponent(String),
    #[error("identity has more than two components: {0}")]
    TooManyComponents(String),
}
