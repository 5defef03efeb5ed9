//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Subscription API and subscriber WebSocket sessions.
pub mod api;

/// BitMEX realtime feed and instrument catalog adapters.
pub mod bitmex;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Subscriber state persistence.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
