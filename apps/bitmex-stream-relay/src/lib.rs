#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! BitMEX Stream Relay - Trade Fan-out Service
//!
//! Maintains a single connection to the BitMEX realtime `trade` feed and
//! relays each trade to every connected subscriber that follows its symbol.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types and concurrent containers
//!   - `streaming`: Trade events and delivery frames
//!   - `symbols`: Known symbol set
//!   - `subscription`: Symbol to subscriber index
//!   - `connection`: Subscriber to live connection registry
//!   - `subscriber`: Subscriber identity, persisted state, requests
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Catalog, persistence, feed control, identity
//!   - `services`: Symbol registry, subscription mutation, fan-out routing
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bitmex`: Realtime feed client and instrument catalog
//!   - `api`: Subscription endpoint and subscriber sockets
//!   - `persistence`: Subscriber state store
//!   - `config`: Configuration loading
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    +------------+     +---------------+
//! BitMEX trade WS -->| FeedClient |---->| FanoutRouter  |---> Subscriber 1
//!                    +------------+     |  index lookup |---> Subscriber 2
//!                          ^            +---------------+---> Subscriber N
//!                          | subscribe        ^
//!                    +------------+           |
//!                    |  Symbol    |<----------+ refresh on unknown symbol
//!                    |  Registry  |
//!                    +------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and concurrent containers.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionId, ConnectionRegistry, SubscriberConnection};
pub use domain::streaming::{DeliveryFrame, TradeEvent, TradeSide};
pub use domain::subscriber::{
    SubscriberId, SubscriberState, SubscriptionAction, SubscriptionRequest, SubscriptionScope,
};
pub use domain::subscription::SubscriptionIndex;
pub use domain::symbols::{Symbol, SymbolSet};

// Services
pub use application::services::{
    FanoutRouter, RouteOutcome, SubscriptionError, SubscriptionService, SymbolRegistry,
};

// Infrastructure config
pub use infrastructure::config::{
    BitmexEnvironment, ConfigError, RelayConfig, RelaySettings, ServerSettings, WebSocketSettings,
};

// Servers
pub use infrastructure::api::{ApiServer, ApiServerError, ApiState};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Feed client
pub use infrastructure::bitmex::{FeedClient, FeedClientConfig, FeedHandle, FeedState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
