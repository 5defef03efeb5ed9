//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CatalogSource`: list of currently tradable instruments
//! - `SubscriberRepository`: durable subscriber subscription state
//! - `FeedControl`: subscribe requests to the upstream feed
//!
//! ## Driver Ports (Inbound)
//!
//! - `IdentityResolver`: maps a session credential to a subscriber identity

use async_trait::async_trait;

use crate::domain::subscriber::{SubscriberId, SubscriberState};
use crate::domain::symbols::Symbol;

// =============================================================================
// Catalog
// =============================================================================

/// Errors from the instrument catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog could not be reached.
    #[error("catalog request failed: {0}")]
    Request(String),

    /// The catalog answered with something other than an instrument list.
    #[error("malformed catalog response: {0}")]
    Malformed(String),
}

/// Source of tradable symbol names.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch every currently tradable symbol.
    async fn fetch_symbols(&self) -> Result<Vec<Symbol>, CatalogError>;
}

// =============================================================================
// Persistence
// =============================================================================

/// Errors from the subscriber repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No state exists for the subscriber.
    #[error("subscriber {0} not found")]
    NotFound(SubscriberId),

    /// The backing store failed.
    #[error("subscriber store unavailable: {0}")]
    Unavailable(String),
}

/// Durable store of subscriber subscription state.
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Load one subscriber's state.
    async fn get(&self, subscriber: SubscriberId) -> Result<SubscriberState, RepositoryError>;

    /// Load every subscriber's state.
    async fn get_all(&self) -> Result<Vec<SubscriberState>, RepositoryError>;

    /// Store a subscriber's state.
    async fn update(&self, state: &SubscriberState) -> Result<(), RepositoryError>;
}

// =============================================================================
// Feed Control
// =============================================================================

/// Errors from the feed control channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedControlError {
    /// The feed connector is no longer running.
    #[error("feed connector stopped")]
    Closed,
}

/// Control channel to the upstream feed connector.
#[async_trait]
pub trait FeedControl: Send + Sync {
    /// Ask the feed to start streaming trades for the given symbols.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), FeedControlError>;
}

// =============================================================================
// Identity
// =============================================================================

/// Errors resolving a subscriber identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,

    /// The credential was not accepted.
    #[error("invalid credential")]
    InvalidCredential,
}

/// Resolves a session credential to a subscriber identity.
pub trait IdentityResolver: Send + Sync {
    /// Resolve a bearer credential.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredential`] if the credential is not
    /// accepted.
    fn resolve(&self, credential: &str) -> Result<SubscriberId, IdentityError>;
}
