//! Subscription Mutation Service
//!
//! Validates and applies subscribe and unsubscribe requests. Every request
//! is validated completely before anything changes, then persisted, then
//! applied to the subscription index. Mutations are serialized per service.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::application::ports::{RepositoryError, SubscriberRepository};
use crate::application::services::SymbolRegistry;
use crate::domain::subscriber::{
    SubscriberId, SubscriberState, SubscriptionAction, SubscriptionRequest,
};
use crate::domain::subscription::SubscriptionIndex;
use crate::domain::symbols::Symbol;

// =============================================================================
// Errors
// =============================================================================

/// Errors from a subscription mutation.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// A requested symbol is not tradable.
    #[error("incorrect symbol: {0}")]
    IncorrectSymbol(Symbol),

    /// The subscriber already receives a requested symbol.
    #[error("you have already subscribed to {0}")]
    AlreadySubscribed(Symbol),

    /// The subscriber has no active subscription.
    #[error("you have already unsubscribed")]
    AlreadyUnsubscribed,

    /// Reading or writing the subscriber state failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SubscriptionError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::IncorrectSymbol(_) => "incorrect_symbol",
            Self::AlreadySubscribed(_) => "already_subscribed",
            Self::AlreadyUnsubscribed => "already_unsubscribed",
            Self::Repository(RepositoryError::NotFound(_)) => "subscriber_not_found",
            Self::Repository(RepositoryError::Unavailable(_)) => "internal_error",
        }
    }

    /// Whether the request was rejected by validation, with nothing changed.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Repository(_))
    }
}

// =============================================================================
// Service
// =============================================================================

/// Applies subscription mutations to the index and the repository.
pub struct SubscriptionService {
    registry: Arc<SymbolRegistry>,
    index: Arc<SubscriptionIndex>,
    repository: Arc<dyn SubscriberRepository>,
    mutation_lock: Mutex<()>,
}

impl SubscriptionService {
    /// Create a service over the shared registry and index.
    pub fn new(
        registry: Arc<SymbolRegistry>,
        index: Arc<SubscriptionIndex>,
        repository: Arc<dyn SubscriberRepository>,
    ) -> Self {
        Self {
            registry,
            index,
            repository,
            mutation_lock: Mutex::new(()),
        }
    }

    /// Apply one request for a subscriber and return the persisted state.
    ///
    /// # Errors
    ///
    /// Returns a validation error with nothing changed, or
    /// [`SubscriptionError::Repository`] if the state cannot be read or
    /// written.
    pub async fn apply(
        &self,
        subscriber: SubscriberId,
        request: &SubscriptionRequest,
    ) -> Result<SubscriberState, SubscriptionError> {
        let _guard = self.mutation_lock.lock().await;
        let state = self.repository.get(subscriber).await?;

        let result = match request.action {
            SubscriptionAction::Subscribe if request.symbols.is_empty() => {
                self.subscribe_all(state).await
            }
            SubscriptionAction::Subscribe => self.subscribe_symbols(state, &request.symbols).await,
            SubscriptionAction::Unsubscribe => self.unsubscribe(state).await,
        };

        match &result {
            Ok(state) => tracing::info!(
                subscriber = %subscriber,
                action = ?request.action,
                symbols = state.symbols.len(),
                subscribed = state.subscribed,
                "Subscription updated"
            ),
            Err(e) if e.is_rejection() => tracing::debug!(
                subscriber = %subscriber,
                reason = e.reason(),
                "Subscription request rejected"
            ),
            Err(e) => tracing::error!(
                subscriber = %subscriber,
                error = %e,
                "Subscription update failed"
            ),
        }

        result
    }

    /// Idempotent: repeating it rewrites the same state.
    async fn subscribe_all(
        &self,
        state: SubscriberState,
    ) -> Result<SubscriberState, SubscriptionError> {
        let next = SubscriberState {
            subscriber_id: state.subscriber_id,
            subscribed: true,
            symbols: Vec::new(),
        };
        self.repository.update(&next).await?;

        let appended = self.index.follow_all(next.subscriber_id);
        tracing::debug!(subscriber = %next.subscriber_id, appended, "Following all symbols");
        Ok(next)
    }

    async fn subscribe_symbols(
        &self,
        state: SubscriberState,
        requested: &[Symbol],
    ) -> Result<SubscriberState, SubscriptionError> {
        let subscriber = state.subscriber_id;

        if requested.iter().any(|symbol| !self.index.is_known(symbol)) {
            if let Err(e) = self.registry.refresh().await {
                tracing::warn!(error = %e, "Refresh for unknown requested symbol failed");
            }
            if let Some(symbol) = requested.iter().find(|s| !self.index.is_known(s)) {
                return Err(SubscriptionError::IncorrectSymbol(symbol.clone()));
            }
        }

        let mut seen = HashSet::with_capacity(requested.len());
        for symbol in requested {
            if !seen.insert(symbol.as_str())
                || state.symbols.contains(symbol)
                || self.index.contains(symbol, subscriber)
            {
                return Err(SubscriptionError::AlreadySubscribed(symbol.clone()));
            }
        }

        let mut next = state;
        next.subscribed = true;
        next.symbols.extend(requested.iter().cloned());
        self.repository.update(&next).await?;

        for symbol in requested {
            self.index.append(symbol, subscriber);
        }
        Ok(next)
    }

    async fn unsubscribe(
        &self,
        state: SubscriberState,
    ) -> Result<SubscriberState, SubscriptionError> {
        if !state.subscribed {
            return Err(SubscriptionError::AlreadyUnsubscribed);
        }

        let next = SubscriberState::new(state.subscriber_id);
        self.repository.update(&next).await?;

        // Clear the mark first so no concurrent seed re-adds the subscriber.
        self.index.unfollow_all(next.subscriber_id);
        self.registry.forget_deferred(next.subscriber_id);
        let removed = self.index.remove_everywhere(next.subscriber_id);
        tracing::debug!(subscriber = %next.subscriber_id, removed, "Removed from all symbols");
        Ok(next)
    }
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService").finish_non_exhaustive()
    }
}
