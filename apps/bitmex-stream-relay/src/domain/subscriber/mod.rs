//! Subscriber Identity and Subscription State
//!
//! A subscriber is an opaque identity supplied by the authentication layer.
//! Its durable subscription state lives in the persistence collaborator and
//! is read and written by the subscription service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::symbols::Symbol;

// =============================================================================
// Identity
// =============================================================================

/// Opaque identity of one end-user session owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriberId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// =============================================================================
// Persisted State
// =============================================================================

/// Subscription state persisted per subscriber.
///
/// `subscribed = true` with an empty symbol list means "every current and
/// future symbol".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberState {
    /// Owner of this state.
    #[serde(rename = "userId")]
    pub subscriber_id: SubscriberId,
    /// Whether the subscriber currently receives any trades.
    #[serde(rename = "subscription")]
    pub subscribed: bool,
    /// Explicitly requested symbols.
    #[serde(rename = "subscriptionSymbols", default)]
    pub symbols: Vec<Symbol>,
}

/// Interpreted view of a [`SubscriberState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope<'a> {
    /// Not subscribed to anything.
    Inactive,
    /// Subscribed to every current and future symbol.
    AllSymbols,
    /// Subscribed to an explicit list.
    Symbols(&'a [Symbol]),
}

impl SubscriberState {
    /// A fresh, unsubscribed state.
    #[must_use]
    pub const fn new(subscriber_id: SubscriberId) -> Self {
        Self {
            subscriber_id,
            subscribed: false,
            symbols: Vec::new(),
        }
    }

    /// Interpret the persisted flag and list.
    #[must_use]
    pub fn scope(&self) -> SubscriptionScope<'_> {
        match (self.subscribed, self.symbols.is_empty()) {
            (false, _) => SubscriptionScope::Inactive,
            (true, true) => SubscriptionScope::AllSymbols,
            (true, false) => SubscriptionScope::Symbols(&self.symbols),
        }
    }

    /// Whether the state follows every symbol, including future ones.
    #[must_use]
    pub fn follows_all_symbols(&self) -> bool {
        matches!(self.scope(), SubscriptionScope::AllSymbols)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Requested subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Subscribe to the listed symbols, or to all when the list is empty.
    Subscribe,
    /// Unsubscribe from everything.
    Unsubscribe,
}

/// Subscription mutation request from the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Requested action.
    pub action: SubscriptionAction,
    /// Symbols for an explicit subscribe. Ignored on unsubscribe.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

impl SubscriptionRequest {
    /// Subscribe to the given symbols (empty means all).
    #[must_use]
    pub fn subscribe<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            action: SubscriptionAction::Subscribe,
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Unsubscribe from everything.
    #[must_use]
    pub const fn unsubscribe() -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            symbols: Vec::new(),
        }
    }
}
