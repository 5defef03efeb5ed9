//! Feed Connection State
//!
//! Shared, lock-light view of the upstream connection, written by the feed
//! client and read by the health server.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::infrastructure::metrics;

/// Upstream connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    /// Opening the WebSocket.
    Connecting,
    /// Connected and streaming.
    Live,
    /// Connection lost; backing off before the next attempt.
    Degraded,
    /// Stopped for good.
    Closed,
}

impl FeedConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }

    /// Numeric gauge value.
    #[must_use]
    pub const fn as_gauge(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Live => 1,
            Self::Degraded => 2,
            Self::Closed => 3,
        }
    }
}

/// Point-in-time copy of [`FeedState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Connection state.
    pub state: FeedConnectionState,
    /// When the feed last became live.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection or feed error.
    pub last_error: Option<String>,
    /// Reconnect attempts since the feed was last live.
    pub reconnect_attempts: u32,
    /// Frames received over the process lifetime.
    pub frames_received: u64,
    /// Trades decoded over the process lifetime.
    pub trades_received: u64,
    /// Frames skipped as undecodable.
    pub decode_errors: u64,
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug)]
pub struct FeedState {
    state: RwLock<FeedConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    trades_received: AtomicU64,
    decode_errors: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// A feed that has not connected yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(FeedConnectionState::Connecting),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            trades_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Move to a new state. Becoming live clears the error and attempt count.
    pub fn set_state(&self, state: FeedConnectionState) {
        *self.state.write() = state;
        if state == FeedConnectionState::Live {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
        metrics::set_feed_state(state);
    }

    /// Record a connection failure and mark the feed degraded.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
        self.set_state(FeedConnectionState::Degraded);
    }

    /// Record an error reported by the feed without changing state.
    pub fn note_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Count a reconnect attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an inbound frame.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count decoded trades.
    pub fn record_trades(&self, count: usize) {
        self.trades_received
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Count an undecodable frame.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Whether the feed is streaming.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() == FeedConnectionState::Live
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            trades_received: self.trades_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_error("connection reset".into());
        state.record_reconnect_attempt();
        assert_eq!(state.state(), FeedConnectionState::Degraded);
        assert_eq!(state.status().reconnect_attempts, 1);

        state.set_state(FeedConnectionState::Live);

        let status = state.status();
        assert!(state.is_live());
        assert_eq!(status.last_error, None);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_connected_at.is_some());
    }

    #[test]
    fn feed_errors_do_not_change_state() {
        let state = FeedState::new();
        state.set_state(FeedConnectionState::Live);

        state.note_error("Unknown table".into());

        assert!(state.is_live());
        assert_eq!(state.status().last_error.as_deref(), Some("Unknown table"));
    }

    #[test]
    fn counters_accumulate() {
        let state = FeedState::new();
        state.record_frame();
        state.record_frame();
        state.record_trades(5);
        state.record_decode_error();

        let status = state.status();
        assert_eq!(status.frames_received, 2);
        assert_eq!(status.trades_received, 5);
        assert_eq!(status.decode_errors, 1);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FeedConnectionState::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(FeedConnectionState::Closed.as_gauge(), 3);
    }
}
