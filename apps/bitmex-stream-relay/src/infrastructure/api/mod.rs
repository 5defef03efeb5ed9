//! Subscriber-Facing API
//!
//! Axum server exposing the subscription mutation endpoint and the
//! per-subscriber delivery socket.
//!
//! # Endpoints
//!
//! - `PATCH /api/v1/bit-mex/subscription` - Apply a [`SubscriptionRequest`]
//! - `GET /api/v1/bit-mex/ws` - Upgrade to the trade delivery WebSocket
//!
//! Both resolve the caller from `Authorization: Bearer <token>`; the socket
//! also accepts `?token=`.
//!
//! [`SubscriptionRequest`]: crate::domain::subscriber::SubscriptionRequest

mod error;
mod identity;
mod routes;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::IdentityResolver;
use crate::application::services::SubscriptionService;
use crate::domain::connection::ConnectionRegistry;

pub use error::{ApiError, ErrorResponse};
pub use identity::{BearerTokenIdentity, bearer_token, resolve_caller};
pub use routes::{SessionQuery, SubscriptionResponse};
pub use session::{SessionEnd, run_session};

/// Subscription endpoint path.
pub const SUBSCRIPTION_PATH: &str = "/api/v1/bit-mex/subscription";

/// Delivery socket path.
pub const SESSION_PATH: &str = "/api/v1/bit-mex/ws";

/// Shared state for the API handlers.
pub struct ApiState {
    subscriptions: Arc<SubscriptionService>,
    connections: Arc<ConnectionRegistry>,
    identity: Arc<dyn IdentityResolver>,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl ApiState {
    /// Create API state.
    #[must_use]
    pub fn new(
        subscriptions: Arc<SubscriptionService>,
        connections: Arc<ConnectionRegistry>,
        identity: Arc<dyn IdentityResolver>,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscriptions,
            connections,
            identity,
            queue_capacity,
            shutdown,
        }
    }
}

/// Build the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(SUBSCRIPTION_PATH, patch(routes::update_subscription))
        .route(SESSION_PATH, get(routes::open_session))
        .with_state(state)
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Subscription API HTTP server.
pub struct ApiServer {
    port: u16,
    state: Arc<ApiState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ApiState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ApiServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Subscription API listening");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Subscription API stopped");
        Ok(())
    }
}
