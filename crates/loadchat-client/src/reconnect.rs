//! Reconnect decisions: which closures retry, and how long to wait.

use loadchat_core::close_code;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default delay cap in milliseconds.
pub const DEFAULT_CAP_DELAY_MS: u64 = 5000;
/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Default number of reconnect attempts after a drop.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            cap_delay_ms: DEFAULT_CAP_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-indexed):
    /// `min(base * multiplier^(attempt - 1), cap)`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.cap_delay_ms as f64);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Attempt counter over a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    /// A counter at zero attempts.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The policy delays are computed from.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Claim the next attempt. `None` once `max_attempts` are used up.
    pub fn next_delay(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.policy.delay_for(self.attempts)))
    }

    /// Start over at attempt 1; called once a socket opens.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// What a close code means for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Deliberate shutdown. Stay closed.
    Normal,
    /// The server will never accept this protocol. Stay closed.
    Permanent,
    /// Transient loss. Back off and reconnect.
    Retry,
}

/// Close-code categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseCodePolicy {
    pub normal: u16,
    pub permanent: Vec<u16>,
}

impl Default for CloseCodePolicy {
    fn default() -> Self {
        Self {
            normal: close_code::NORMAL,
            permanent: vec![close_code::ABNORMAL],
        }
    }
}

impl CloseCodePolicy {
    /// What closing with `code` means for reconnection.
    pub fn classify(&self, code: u16) -> CloseDisposition {
        if code == self.normal {
            CloseDisposition::Normal
        } else if self.permanent.contains(&code) {
            CloseDisposition::Permanent
        } else {
            CloseDisposition::Retry
        }
    }
}
