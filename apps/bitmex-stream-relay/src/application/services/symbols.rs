//! Symbol Registry Service
//!
//! Owns the known symbol set and keeps it in step with the instrument
//! catalog. Every refresh seeds index entries for new symbols and asks the
//! feed to stream them.
//!
//! Persisted subscriptions to symbols the catalog has not listed yet are
//! parked at startup and restored by the refresh that discovers them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::application::ports::{
    CatalogError, CatalogSource, FeedControl, RepositoryError, SubscriberRepository,
};
use crate::domain::subscriber::{SubscriberId, SubscriptionScope};
use crate::domain::subscription::{AppendOutcome, SubscriptionIndex};
use crate::domain::symbols::{Symbol, SymbolSet};
use crate::infrastructure::metrics;

/// Errors from a symbol refresh.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The catalog could not be read. Known symbols are unchanged.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Outcome of re-registering persisted subscriptions at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Subscribers with an active subscription.
    pub subscribers: usize,
    /// Explicit (symbol, subscriber) pairs restored.
    pub subscriptions: usize,
    /// Subscribers restored as following every symbol.
    pub follow_all: usize,
    /// Persisted (symbol, subscriber) pairs parked until the symbol is listed.
    pub deferred: usize,
}

/// Authoritative registry of tradable symbols.
pub struct SymbolRegistry {
    symbols: Arc<SymbolSet>,
    index: Arc<SubscriptionIndex>,
    catalog: Arc<dyn CatalogSource>,
    feed: Arc<dyn FeedControl>,
    refresh_lock: Mutex<()>,
    started_refreshes: AtomicU64,
    last_completed: AtomicU64,
    deferred: parking_lot::Mutex<BTreeMap<Symbol, Vec<SubscriberId>>>,
}

impl SymbolRegistry {
    /// Create a registry over a shared symbol set and index.
    pub fn new(
        symbols: Arc<SymbolSet>,
        index: Arc<SubscriptionIndex>,
        catalog: Arc<dyn CatalogSource>,
        feed: Arc<dyn FeedControl>,
    ) -> Self {
        Self {
            symbols,
            index,
            catalog,
            feed,
            refresh_lock: Mutex::new(()),
            started_refreshes: AtomicU64::new(0),
            last_completed: AtomicU64::new(0),
            deferred: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    /// Fetch the catalog and merge newly seen symbols.
    ///
    /// Concurrent callers are coalesced: a caller returns without fetching
    /// only if a refresh that started after it arrived has completed, so the
    /// catalog is always read at least once after the call began. Returns
    /// the symbols added by this call.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Catalog`] if the catalog is unreachable or
    /// malformed. Known symbols are left unchanged.
    pub async fn refresh(&self) -> Result<Vec<Symbol>, RefreshError> {
        let arrived_after = self.started_refreshes.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.last_completed.load(Ordering::Acquire) > arrived_after {
            tracing::debug!("Newer symbol refresh completed while waiting, skipping");
            return Ok(Vec::new());
        }
        let generation = self.started_refreshes.fetch_add(1, Ordering::AcqRel) + 1;

        let fetched = self
            .catalog
            .fetch_symbols()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Symbol refresh failed"))?;
        let fetched_count = fetched.len();

        // Seed before publishing so a known symbol always has an index entry.
        let new_symbols: Vec<Symbol> = fetched
            .into_iter()
            .filter(|symbol| !symbol.is_empty() && !self.symbols.contains(symbol))
            .collect();
        for symbol in &new_symbols {
            self.index.seed(symbol.clone());
        }
        let restored = self.restore_deferred(&new_symbols);
        let added = self.symbols.merge(new_symbols);

        self.last_completed.store(generation, Ordering::Release);
        metrics::set_known_symbols(self.symbols.len());

        if added.is_empty() {
            tracing::debug!(fetched = fetched_count, "Symbol refresh found no new symbols");
            return Ok(added);
        }

        tracing::info!(
            added = added.len(),
            known = self.symbols.len(),
            restored,
            "Discovered new symbols"
        );

        if let Err(e) = self.feed.subscribe(&added).await {
            tracing::warn!(error = %e, count = added.len(), "Failed to subscribe new symbols upstream");
        }

        Ok(added)
    }

    /// Known symbols in discovery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.symbols.snapshot()
    }

    /// Whether the symbol is known.
    #[must_use]
    pub fn is_known(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    /// Number of known symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether no symbol is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Re-register every persisted subscription into the index.
    ///
    /// Runs once at startup after the first refresh. Persisted symbols that
    /// are not known yet are parked and restored when a later refresh
    /// discovers them.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot list subscribers.
    pub async fn replay_persisted(
        &self,
        repository: &dyn SubscriberRepository,
    ) -> Result<ReplaySummary, RepositoryError> {
        let states = repository.get_all().await?;
        let mut summary = ReplaySummary::default();
        let mut grouped: BTreeMap<Symbol, Vec<SubscriberId>> = BTreeMap::new();

        for state in &states {
            match state.scope() {
                SubscriptionScope::Inactive => continue,
                SubscriptionScope::AllSymbols => {
                    self.index.follow_all(state.subscriber_id);
                    summary.follow_all += 1;
                }
                SubscriptionScope::Symbols(symbols) => {
                    for symbol in symbols {
                        if !self.index.is_known(symbol) {
                            tracing::warn!(
                                subscriber = %state.subscriber_id,
                                symbol = %symbol,
                                "Deferring persisted subscription to unlisted symbol"
                            );
                            let mut deferred = self.deferred.lock();
                            let waiting = deferred.entry(symbol.clone()).or_default();
                            if !waiting.contains(&state.subscriber_id) {
                                waiting.push(state.subscriber_id);
                            }
                            summary.deferred += 1;
                            continue;
                        }
                        grouped
                            .entry(symbol.clone())
                            .or_default()
                            .push(state.subscriber_id);
                        summary.subscriptions += 1;
                    }
                }
            }
            summary.subscribers += 1;
        }

        for (symbol, subscribers) in grouped {
            let mut merged = self.index.get(&symbol).unwrap_or_default();
            merged.extend(subscribers);
            self.index.set(symbol, merged);
        }

        tracing::info!(
            subscribers = summary.subscribers,
            subscriptions = summary.subscriptions,
            follow_all = summary.follow_all,
            deferred = summary.deferred,
            "Restored persisted subscriptions"
        );

        Ok(summary)
    }

    /// Drop a subscriber's parked subscriptions.
    pub fn forget_deferred(&self, subscriber: SubscriberId) {
        let mut deferred = self.deferred.lock();
        deferred.retain(|_, waiting| {
            waiting.retain(|id| *id != subscriber);
            !waiting.is_empty()
        });
    }

    /// Number of symbols with parked subscriptions.
    #[must_use]
    pub fn deferred_symbols(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Append parked subscribers to freshly seeded entries.
    fn restore_deferred(&self, symbols: &[Symbol]) -> usize {
        let ready: Vec<(Symbol, Vec<SubscriberId>)> = {
            let mut deferred = self.deferred.lock();
            if deferred.is_empty() {
                return 0;
            }
            symbols
                .iter()
                .filter_map(|symbol| deferred.remove_entry(symbol))
                .collect()
        };

        let mut restored = 0;
        for (symbol, subscribers) in ready {
            for subscriber in subscribers {
                if self.index.append(&symbol, subscriber) == AppendOutcome::Appended {
                    restored += 1;
                }
            }
        }
        restored
    }
}

impl std::fmt::Debug for SymbolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolRegistry")
            .field("known", &self.symbols.len())
            .finish_non_exhaustive()
    }
}
