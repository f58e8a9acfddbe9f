//! Connection configuration: where to dial and whether to come back after
//! an unexpected close.

use std::time::Duration;

use rand::Rng;
use rally_protocol::ParticipantId;
use tracing::warn;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for one participant's connection.
///
/// Start from `SessionConfig::default()` and override what you need:
///
/// ```rust
/// use rally_session::SessionConfig;
///
/// let config = SessionConfig {
///     server_url: "ws://lobby.example:9000".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.chat_scrollback, 200);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the authoritative peer. The participant's endpoint is
    /// `{server_url}/ws/{participant_id}`.
    ///
    /// Default: `ws://localhost:8000`.
    pub server_url: String,

    /// Automatic reconnection after an unexpected close. `None` (the
    /// default) means a closed connection stays closed until the next
    /// `connect()` or `send()`.
    pub reconnect: Option<ReconnectPolicy>,

    /// How many chat messages are retained per lobby by the session
    /// facade. Older messages are dropped first. Default: 200.
    pub chat_scrollback: usize,

    /// Name shown to other participants. Sent as `hostName` when creating
    /// a lobby and as `name` when joining one.
    pub display_name: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000".to_owned(),
            reconnect: None,
            chat_scrollback: 200,
            display_name: None,
        }
    }
}

impl SessionConfig {
    /// Config pointing at `server_url` with every other field defaulted.
    pub fn with_url(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// The endpoint `participant` connects to.
    pub fn endpoint(&self, participant: &ParticipantId) -> String {
        format!("{}/ws/{participant}", self.server_url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff for reconnecting after the transport closes without
/// the caller asking for it.
///
/// Attempt `n` (zero-based) waits `min(initial_delay * 2^n, max_delay)`
/// plus a random `0..=jitter` so participants dropped by the same outage
/// do not all redial at the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Attempts before giving up and leaving the connection closed.
    pub max_attempts: u32,
    /// Upper bound on the random extra delay per attempt.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
            jitter: Duration::from_millis(100),
        }
    }
}

impl ReconnectPolicy {
    /// Clamp out-of-range values so the policy is safe to use.
    ///
    /// - `max_attempts` is at least 1.
    /// - `initial_delay` is at least 1 ms.
    /// - `max_delay` is never below `initial_delay`.
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            warn!("reconnect max_attempts is 0, using 1");
            self.max_attempts = 1;
        }
        if self.initial_delay.is_zero() {
            self.initial_delay = Duration::from_millis(1);
        }
        if self.max_delay < self.initial_delay {
            warn!(
                max_delay = ?self.max_delay,
                initial_delay = ?self.initial_delay,
                "reconnect max_delay below initial_delay, raising it"
            );
            self.max_delay = self.initial_delay;
        }
        self
    }

    /// Backoff before attempt `attempt` (zero-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let base = self
            .initial_delay
            .saturating_mul(factor)
            .min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            base
        } else {
            base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
