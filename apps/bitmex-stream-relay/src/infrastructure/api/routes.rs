//! HTTP Handlers
//!
//! - `PATCH /api/v1/bit-mex/subscription`: subscribe or unsubscribe
//! - `GET /api/v1/bit-mex/ws`: open the subscriber delivery socket

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade, rejection::JsonRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::domain::subscriber::{SubscriberState, SubscriptionRequest};
use crate::infrastructure::api::error::ApiError;
use crate::infrastructure::api::identity::resolve_caller;
use crate::infrastructure::api::session::run_session;
use crate::infrastructure::api::ApiState;

/// Successful mutation response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    /// Always `true`.
    pub success: bool,
    /// State after the mutation.
    #[serde(flatten)]
    pub state: SubscriberState,
}

/// Query parameters accepted by the socket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    /// Credential for clients that cannot set headers.
    #[serde(default)]
    pub token: Option<String>,
}

pub(super) async fn update_subscription(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscriber = resolve_caller(state.identity.as_ref(), &headers, None)?;
    let Json(request) = body?;

    let next = state.subscriptions.apply(subscriber, &request).await?;

    Ok(Json(SubscriptionResponse {
        success: true,
        state: next,
    }))
}

pub(super) async fn open_session(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let subscriber = resolve_caller(state.identity.as_ref(), &headers, query.token.as_deref())?;

    Ok(upgrade
        .on_upgrade(move |socket| async move {
            run_session(socket, subscriber, state).await;
        })
        .into_response())
}
