//! Feed Heartbeat
//!
//! BitMEX liveness convention: when no frame has arrived for the ping
//! interval, send the text `ping`; if nothing (including `pong`) arrives
//! within the pong timeout after that, the connection is dead.
//!
//! The monitor is a pure state machine. The feed loop sleeps until
//! [`Heartbeat::deadline`] and reports back via [`Heartbeat::on_deadline`].

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Idle time before a ping is sent.
    pub ping_interval: Duration,
    /// Time allowed for any frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl HeartbeatConfig {
    /// Build from WebSocket settings.
    #[must_use]
    pub const fn from_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the feed loop should do when the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a `ping` frame.
    SendPing,
    /// No reply within the timeout; reconnect.
    TimedOut,
    /// Traffic arrived since the deadline was computed; keep waiting.
    Wait,
}

/// Heartbeat errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// No frame arrived within the pong timeout.
    #[error("no frame received within {0:?} of ping")]
    Timeout(Duration),
}

/// Idle monitor for one connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_inbound: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start monitoring a freshly opened connection.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_inbound: now,
            ping_sent_at: None,
        }
    }

    /// Any inbound frame proves liveness.
    pub const fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
        self.ping_sent_at = None;
    }

    /// When the loop should next call [`Self::on_deadline`].
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.ping_sent_at.map_or_else(
            || self.last_inbound + self.config.ping_interval,
            |sent| sent + self.config.pong_timeout,
        )
    }

    /// Decide what to do at or after the deadline.
    pub fn on_deadline(&mut self, now: Instant) -> HeartbeatAction {
        if now < self.deadline() {
            return HeartbeatAction::Wait;
        }
        if self.ping_sent_at.is_some() {
            return HeartbeatAction::TimedOut;
        }
        self.ping_sent_at = Some(now);
        HeartbeatAction::SendPing
    }

    /// Error describing a timeout under this configuration.
    #[must_use]
    pub const fn timeout_error(&self) -> HeartbeatError {
        HeartbeatError::Timeout(self.config.pong_timeout)
    }
}
