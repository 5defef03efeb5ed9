//! Subscriber Identity
//!
//! Bearer credentials are resolved to a [`SubscriberId`] by an
//! [`IdentityResolver`]. The bundled resolver accepts the subscriber's UUID
//! as the token; a deployment behind an auth gateway swaps in its own.

use axum::http::{HeaderMap, header};

use crate::application::ports::{IdentityError, IdentityResolver};
use crate::domain::subscriber::SubscriberId;

/// Resolver that reads the subscriber UUID directly from the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerTokenIdentity;

impl IdentityResolver for BearerTokenIdentity {
    fn resolve(&self, credential: &str) -> Result<SubscriberId, IdentityError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(IdentityError::MissingCredential);
        }
        credential
            .parse()
            .map_err(|_| IdentityError::InvalidCredential)
    }
}

/// Token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the caller from the header, falling back to a query token.
///
/// # Errors
///
/// Returns [`IdentityError::MissingCredential`] if neither is present, or
/// the resolver's error.
pub fn resolve_caller(
    resolver: &dyn IdentityResolver,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<SubscriberId, IdentityError> {
    let credential = bearer_token(headers)
        .or(query_token)
        .ok_or(IdentityError::MissingCredential)?;
    resolver.resolve(credential)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use test_case::test_case;

    use super::*;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap(),
        );
        headers
    }

    #[test_case("Bearer abc", Some("abc"); "standard")]
    #[test_case("bearer  abc ", Some("abc"); "lowercase scheme and padding")]
    #[test_case("Basic abc", None; "other scheme")]
    #[test_case("Bearer ", None; "empty token")]
    #[test_case("abc", None; "no scheme")]
    fn bearer_token_parsing(value: &str, expected: Option<&str>) {
        assert_eq!(bearer_token(&headers(value)), expected);
    }

    #[test]
    fn uuid_token_resolves_to_subscriber() {
        let id = SubscriberId::random();

        let resolved = BearerTokenIdentity.resolve(&id.to_string());

        assert_eq!(resolved, Ok(id));
    }

    #[test]
    fn non_uuid_token_is_invalid() {
        assert_eq!(
            BearerTokenIdentity.resolve("not-a-uuid"),
            Err(IdentityError::InvalidCredential)
        );
        assert_eq!(
            BearerTokenIdentity.resolve("  "),
            Err(IdentityError::MissingCredential)
        );
    }

    #[test]
    fn header_wins_over_query_token() {
        let from_header = SubscriberId::random();
        let from_query = SubscriberId::random();

        let resolved = resolve_caller(
            &BearerTokenIdentity,
            &headers(&format!("Bearer {from_header}")),
            Some(&from_query.to_string()),
        );

        assert_eq!(resolved, Ok(from_header));
        assert_eq!(
            resolve_caller(&BearerTokenIdentity, &HeaderMap::new(), None),
            Err(IdentityError::MissingCredential)
        );
    }
}
