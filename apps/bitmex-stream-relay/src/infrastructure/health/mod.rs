//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (ready while the feed is live)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SymbolRegistry;
use crate::domain::connection::ConnectionRegistry;
use crate::domain::subscription::SubscriptionIndex;
use crate::infrastructure::bitmex::{FeedConnectionState, FeedState, FeedStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedStatus,
    /// Known symbol count.
    pub symbols: usize,
    /// Connected subscriber count.
    pub subscribers: usize,
    /// Subscription index statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed is live.
    Healthy,
    /// Feed is reconnecting.
    Degraded,
    /// Feed is closed.
    Unhealthy,
}

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionStatus {
    /// Total (symbol, subscriber) pairs.
    pub total: usize,
    /// Subscribers following every symbol.
    pub follow_all: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    registry: Arc<SymbolRegistry>,
    index: Arc<SubscriptionIndex>,
    connections: Arc<ConnectionRegistry>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        registry: Arc<SymbolRegistry>,
        index: Arc<SubscriptionIndex>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            registry,
            index,
            connections,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn create_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.is_live() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.feed.status();
    let stats = state.index.stats();

    HealthResponse {
        status: determine_health_status(feed.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        symbols: state.registry.len(),
        subscribers: state.connections.len(),
        subscriptions: SubscriptionStatus {
            total: stats.subscriptions,
            follow_all: stats.follow_all,
        },
    }
}

const fn determine_health_status(feed: FeedConnectionState) -> HealthStatus {
    match feed {
        FeedConnectionState::Live => HealthStatus::Healthy,
        FeedConnectionState::Connecting | FeedConnectionState::Degraded => HealthStatus::Degraded,
        FeedConnectionState::Closed => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{
        CatalogError, CatalogSource, FeedControl, FeedControlError,
    };
    use crate::domain::symbols::{Symbol, SymbolSet};

    struct EmptyCatalog;

    #[async_trait]
    impl CatalogSource for EmptyCatalog {
        async fn fetch_symbols(&self) -> Result<Vec<Symbol>, CatalogError> {
            Ok(Vec::new())
        }
    }

    struct IgnoreFeed;

    #[async_trait]
    impl FeedControl for IgnoreFeed {
        async fn subscribe(&self, _symbols: &[Symbol]) -> Result<(), FeedControlError> {
            Ok(())
        }
    }

    fn state(feed: Arc<FeedState>) -> Arc<HealthServerState> {
        let index = Arc::new(SubscriptionIndex::new());
        let registry = Arc::new(SymbolRegistry::new(
            Arc::new(SymbolSet::new()),
            Arc::clone(&index),
            Arc::new(EmptyCatalog),
            Arc::new(IgnoreFeed),
        ));
        Arc::new(HealthServerState::new(
            "test".into(),
            feed,
            registry,
            index,
            Arc::new(ConnectionRegistry::new()),
        ))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_feed_state() {
        assert_eq!(
            determine_health_status(FeedConnectionState::Live),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(FeedConnectionState::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(FeedConnectionState::Closed),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn readiness_tracks_feed() {
        let feed = Arc::new(FeedState::new());
        let app = create_router(state(Arc::clone(&feed)));

        assert_eq!(
            get_status(app.clone(), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        feed.set_state(FeedConnectionState::Live);
        assert_eq!(get_status(app.clone(), "/readyz").await, StatusCode::OK);
        assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn closed_feed_is_unhealthy() {
        let feed = Arc::new(FeedState::new());
        feed.set_state(FeedConnectionState::Closed);
        let app = create_router(state(feed));

        assert_eq!(
            get_status(app, "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
