//! Subscriber Persistence
//!
//! In-process [`SubscriberRepository`]. State survives feed reconnects and
//! subscriber reconnects but not a process restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::ports::{RepositoryError, SubscriberRepository};
use crate::domain::subscriber::{SubscriberId, SubscriberState};

/// Subscriber state held in memory.
#[derive(Debug, Default)]
pub struct InMemorySubscriberRepository {
    states: RwLock<HashMap<SubscriberId, SubscriberState>>,
    auto_provision: bool,
}

impl InMemorySubscriberRepository {
    /// Repository that only knows explicitly inserted subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository that treats an unknown subscriber as present and
    /// unsubscribed.
    #[must_use]
    pub fn with_auto_provision() -> Self {
        Self {
            states: RwLock::default(),
            auto_provision: true,
        }
    }

    /// Seed or overwrite one subscriber's state.
    pub async fn insert(&self, state: SubscriberState) {
        self.states.write().await.insert(state.subscriber_id, state);
    }

    /// Number of stored subscribers.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriberRepository for InMemorySubscriberRepository {
    async fn get(&self, subscriber: SubscriberId) -> Result<SubscriberState, RepositoryError> {
        match self.states.read().await.get(&subscriber) {
            Some(state) => Ok(state.clone()),
            None if self.auto_provision => Ok(SubscriberState::new(subscriber)),
            None => Err(RepositoryError::NotFound(subscriber)),
        }
    }

    async fn get_all(&self) -> Result<Vec<SubscriberState>, RepositoryError> {
        let mut states: Vec<_> = self.states.read().await.values().cloned().collect();
        states.sort_by_key(|s| s.subscriber_id);
        Ok(states)
    }

    async fn update(&self, state: &SubscriberState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        if !self.auto_provision && !states.contains_key(&state.subscriber_id) {
            return Err(RepositoryError::NotFound(state.subscriber_id));
        }
        states.insert(state.subscriber_id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_subscriber_is_not_found() {
        let repo = InMemorySubscriberRepository::new();
        let id = SubscriberId::random();

        assert!(matches!(
            repo.get(id).await,
            Err(RepositoryError::NotFound(missing)) if missing == id
        ));
        assert!(repo.update(&SubscriberState::new(id)).await.is_err());
    }

    #[tokio::test]
    async fn auto_provision_starts_unsubscribed() {
        let repo = InMemorySubscriberRepository::with_auto_provision();
        let id = SubscriberId::random();

        let state = repo.get(id).await.unwrap();

        assert!(!state.subscribed);
        assert!(state.symbols.is_empty());
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn update_replaces_stored_state() {
        let repo = InMemorySubscriberRepository::new();
        let id = SubscriberId::random();
        repo.insert(SubscriberState::new(id)).await;

        let next = SubscriberState {
            subscriber_id: id,
            subscribed: true,
            symbols: vec!["XBTUSD".into()],
        };
        repo.update(&next).await.unwrap();

        assert_eq!(repo.get(id).await.unwrap(), next);
        assert_eq!(repo.get_all().await.unwrap(), vec![next]);
        assert_eq!(repo.len().await, 1);
    }
}
