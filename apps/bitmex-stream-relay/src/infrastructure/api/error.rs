//! API Errors
//!
//! Maps identity, body and subscription failures to HTTP responses with a
//! stable machine-readable `reason`.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::ports::{IdentityError, RepositoryError};
use crate::application::services::SubscriptionError;

/// Errors surfaced by the subscription API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The caller could not be identified.
    #[error("user unauthorized")]
    Unauthorized(#[from] IdentityError),

    /// The request body did not parse.
    #[error("request invalid body: {0}")]
    InvalidBody(String),

    /// The subscription service rejected or failed the request.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Subscription(SubscriptionError::Repository(RepositoryError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            Self::Subscription(SubscriptionError::Repository(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Subscription(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidBody(_) => "invalid_body",
            Self::Subscription(e) => e.reason(),
        }
    }

    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            "something went wrong".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// HTTP status code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// Stable reason code.
    pub reason: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Subscription API request failed");
        }

        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.public_message(),
            reason: self.reason(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscriber::SubscriberId;

    #[test]
    fn rejections_are_bad_requests() {
        let err = ApiError::from(SubscriptionError::IncorrectSymbol("NOPE".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), "incorrect_symbol");

        let err = ApiError::from(SubscriptionError::AlreadyUnsubscribed);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), "already_unsubscribed");
    }

    #[test]
    fn repository_failures_map_to_not_found_and_server_error() {
        let missing = ApiError::from(SubscriptionError::from(RepositoryError::NotFound(
            SubscriberId::random(),
        )));
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let down = ApiError::from(SubscriptionError::from(RepositoryError::Unavailable(
            "connection refused".into(),
        )));
        assert_eq!(down.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(down.public_message(), "something went wrong");
    }

    #[test]
    fn identity_failures_are_unauthorized() {
        let err = ApiError::from(IdentityError::MissingCredential);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason(), "unauthorized");
    }
}
