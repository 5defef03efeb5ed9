//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::time::Duration;

/// BitMEX deployment to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitmexEnvironment {
    /// Testnet (simulated exchange).
    #[default]
    Testnet,
    /// Production exchange.
    Mainnet,
}

impl BitmexEnvironment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mainnet" | "live" | "production" => Self::Mainnet,
            _ => Self::Testnet,
        }
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    /// Default realtime WebSocket endpoint.
    #[must_use]
    pub const fn ws_url(&self) -> &'static str {
        match self {
            Self::Testnet => "wss://testnet.bitmex.com/realtime",
            Self::Mainnet => "wss://ws.bitmex.com/realtime",
        }
    }

    /// Default REST base URL.
    #[must_use]
    pub const fn rest_url(&self) -> &'static str {
        match self {
            Self::Testnet => "https://testnet.bitmex.com",
            Self::Mainnet => "https://www.bitmex.com",
        }
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Idle time before a `ping` is sent.
    pub heartbeat_interval: Duration,
    /// Time allowed for a reply after a `ping`.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(5),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Fan-out and feed tuning.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Topics per subscribe/unsubscribe control frame.
    pub control_batch_size: usize,
    /// Wait after the final unsubscribe before closing the feed.
    pub shutdown_grace: Duration,
    /// Outbound frames buffered per subscriber connection.
    pub subscriber_queue_capacity: usize,
    /// Trade batches buffered between the feed and the router.
    pub feed_channel_capacity: usize,
    /// Timeout for one catalog request.
    pub catalog_timeout: Duration,
    /// Time allowed for the first feed connection.
    pub startup_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            control_batch_size: 15,
            shutdown_grace: Duration::from_secs(1),
            subscriber_queue_capacity: 256,
            feed_channel_capacity: 4096,
            catalog_timeout: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Subscription API and subscriber socket port.
    pub api_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// BitMEX deployment.
    pub environment: BitmexEnvironment,
    /// Overrides the environment's WebSocket endpoint.
    pub ws_url_override: Option<String>,
    /// Overrides the environment's REST base URL.
    pub rest_url_override: Option<String>,
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream connection settings.
    pub websocket: WebSocketSettings,
    /// Fan-out and feed tuning.
    pub relay: RelaySettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or batch size is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or batch size is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let environment = env
            .string("BITMEX_ENV")
            .map(|s| BitmexEnvironment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            api_port: env.parse("RELAY_API_PORT", server_defaults.api_port),
            health_port: env.parse("RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: env.secs(
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                ws_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "RELAY_HEARTBEAT_TIMEOUT_SECS",
                ws_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.millis(
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
        };

        let relay_defaults = RelaySettings::default();
        let relay = RelaySettings {
            control_batch_size: env.nonzero(
                "RELAY_CONTROL_BATCH_SIZE",
                relay_defaults.control_batch_size,
            )?,
            shutdown_grace: env.millis("RELAY_SHUTDOWN_GRACE_MS", relay_defaults.shutdown_grace),
            subscriber_queue_capacity: env.nonzero(
                "RELAY_SUBSCRIBER_QUEUE_CAPACITY",
                relay_defaults.subscriber_queue_capacity,
            )?,
            feed_channel_capacity: env.nonzero(
                "RELAY_FEED_CHANNEL_CAPACITY",
                relay_defaults.feed_channel_capacity,
            )?,
            catalog_timeout: env.secs("RELAY_CATALOG_TIMEOUT_SECS", relay_defaults.catalog_timeout),
            startup_timeout: env.secs("RELAY_STARTUP_TIMEOUT_SECS", relay_defaults.startup_timeout),
        };

        Ok(Self {
            environment,
            ws_url_override: env.string("BITMEX_WS_URL"),
            rest_url_override: env.string("BITMEX_REST_URL"),
            server,
            websocket,
            relay,
        })
    }

    /// Realtime WebSocket endpoint.
    #[must_use]
    pub fn ws_url(&self) -> &str {
        self.ws_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.ws_url())
    }

    /// REST base URL.
    #[must_use]
    pub fn rest_url(&self) -> &str {
        self.rest_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.rest_url())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable is set to a value the relay cannot run with.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn nonzero(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero",
            }),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn environment_parsing() {
        assert_eq!(
            BitmexEnvironment::from_str_case_insensitive("MAINNET"),
            BitmexEnvironment::Mainnet
        );
        assert_eq!(
            BitmexEnvironment::from_str_case_insensitive("testnet"),
            BitmexEnvironment::Testnet
        );
        assert_eq!(
            BitmexEnvironment::from_str_case_insensitive("unknown"),
            BitmexEnvironment::Testnet
        );
    }

    #[test]
    fn defaults_target_testnet() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.ws_url(), "wss://testnet.bitmex.com/realtime");
        assert_eq!(config.rest_url(), "https://testnet.bitmex.com");
        assert_eq!(config.server.api_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.relay.control_batch_size, 15);
        assert_eq!(config.relay.shutdown_grace, Duration::from_secs(1));
        assert_eq!(config.relay.subscriber_queue_capacity, 256);
    }

    #[test]
    fn url_overrides_win() {
        let config = from_pairs(&[
            ("BITMEX_ENV", "mainnet"),
            ("BITMEX_WS_URL", "ws://127.0.0.1:9001/realtime"),
        ])
        .unwrap();

        assert_eq!(config.environment, BitmexEnvironment::Mainnet);
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9001/realtime");
        assert_eq!(config.rest_url(), "https://www.bitmex.com");
    }

    #[test]
    fn tuning_variables_are_read() {
        let config = from_pairs(&[
            ("RELAY_API_PORT", "9000"),
            ("RELAY_HEARTBEAT_INTERVAL_SECS", "10"),
            ("RELAY_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("RELAY_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("RELAY_SHUTDOWN_GRACE_MS", "200"),
            ("RELAY_CONTROL_BATCH_SIZE", "5"),
        ])
        .unwrap();

        assert_eq!(config.server.api_port, 9000);
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(
            config.websocket.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert!((config.websocket.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.relay.shutdown_grace, Duration::from_millis(200));
        assert_eq!(config.relay.control_batch_size, 5);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = from_pairs(&[("RELAY_API_PORT", "not-a-port")]).unwrap();
        assert_eq!(config.server.api_port, 8080);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = from_pairs(&[("RELAY_SUBSCRIBER_QUEUE_CAPACITY", "0")]).unwrap_err();
        assert!(err.to_string().contains("RELAY_SUBSCRIBER_QUEUE_CAPACITY"));

        assert!(from_pairs(&[("RELAY_CONTROL_BATCH_SIZE", "0")]).is_err());
    }
}
