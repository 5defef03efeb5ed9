//! Reconnection Backoff
//!
//! Exponential backoff with jitter between feed reconnection attempts.
//! The delay for attempt `n` (starting at 0) is
//! `min(initial * multiplier^n, max)` scaled by a random factor in
//! `[1 - jitter, 1 + jitter]`.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub jitter: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Build from WebSocket settings.
    #[must_use]
    pub fn from_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Un-jittered delay for a zero-based attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let scaled_nanos = (self.initial_delay.as_nanos() as f64 * factor).round();
        #[allow(clippy::cast_precision_loss)]
        let max_nanos = self.max_delay.as_nanos() as f64;
        if !scaled_nanos.is_finite() || scaled_nanos >= max_nanos {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = scaled_nanos.max(0.0) as u64;
        Duration::from_nanos(nanos)
    }
}

/// Reconnection error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

/// Tracks consecutive failed attempts and yields the next delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no failed attempts.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] once the configured
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Result<Duration, ReconnectError> {
        let max = self.config.max_attempts;
        if max > 0 && self.attempts >= max {
            return Err(ReconnectError::MaxAttemptsExceeded(max));
        }
        let base = self.config.base_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        Ok(self.jittered(base))
    }

    /// Forget failed attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}
