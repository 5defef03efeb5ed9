//! Subscription Index
//!
//! Maps each known symbol to the ordered sequence of subscriber identities
//! interested in it.
//!
//! # Design
//!
//! The index tracks:
//! - One entry per known symbol, created when the symbol is first seeded
//! - Subscribers per entry, in insertion order, each at most once
//! - The subscribe-all set, copied into every newly seeded entry
//!
//! A missing key means "unknown symbol", not "no subscribers". Callers use
//! that distinction to trigger a symbol refresh.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::subscriber::SubscriberId;
use crate::domain::symbols::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Result of appending a subscriber to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The subscriber was added.
    Appended,
    /// The subscriber was already in the entry.
    AlreadyPresent,
    /// The symbol has no entry.
    UnknownSymbol,
}

/// Index statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of symbol entries.
    pub symbols: usize,
    /// Total (symbol, subscriber) pairs.
    pub subscriptions: usize,
    /// Subscribers following every symbol.
    pub follow_all: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<Symbol, Vec<SubscriberId>>,
    follow_all: Vec<SubscriberId>,
}

// =============================================================================
// Subscription Index
// =============================================================================

/// Concurrent symbol to subscribers index.
///
/// Every method takes the lock once; no method calls out while holding it.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    state: RwLock<IndexState>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers of a symbol, or `None` when the symbol is unknown.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Vec<SubscriberId>> {
        self.state.read().entries.get(symbol).cloned()
    }

    /// Replace a symbol's subscriber sequence wholesale.
    ///
    /// Duplicate identities in `subscribers` are collapsed, keeping the first.
    pub fn set(&self, symbol: impl Into<Symbol>, subscribers: Vec<SubscriberId>) {
        let mut deduped = Vec::with_capacity(subscribers.len());
        for id in subscribers {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        self.state.write().entries.insert(symbol.into(), deduped);
    }

    /// Remove a subscriber from one symbol.
    ///
    /// Returns `true` if the subscriber was present.
    pub fn remove(&self, symbol: &str, subscriber: SubscriberId) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.entries.get_mut(symbol) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|id| *id != subscriber);
        entry.len() != before
    }

    /// Remove a subscriber from every entry.
    ///
    /// Returns the number of entries it was removed from.
    pub fn remove_everywhere(&self, subscriber: SubscriberId) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;
        for entry in state.entries.values_mut() {
            let before = entry.len();
            entry.retain(|id| *id != subscriber);
            if entry.len() != before {
                removed += 1;
            }
        }
        removed
    }

    /// Append a subscriber to a symbol if not already present.
    pub fn append(&self, symbol: &str, subscriber: SubscriberId) -> AppendOutcome {
        let mut state = self.state.write();
        match state.entries.get_mut(symbol) {
            None => AppendOutcome::UnknownSymbol,
            Some(entry) if entry.contains(&subscriber) => AppendOutcome::AlreadyPresent,
            Some(entry) => {
                entry.push(subscriber);
                AppendOutcome::Appended
            }
        }
    }

    /// Whether a subscriber is in a symbol's entry.
    #[must_use]
    pub fn contains(&self, symbol: &str, subscriber: SubscriberId) -> bool {
        self.state
            .read()
            .entries
            .get(symbol)
            .is_some_and(|entry| entry.contains(&subscriber))
    }

    /// Whether the symbol has an entry.
    #[must_use]
    pub fn is_known(&self, symbol: &str) -> bool {
        self.state.read().entries.contains_key(symbol)
    }

    /// Create the entry for a newly known symbol.
    ///
    /// The entry starts with every subscribe-all subscriber. Returns `false`
    /// if the entry already existed, in which case it is left untouched.
    pub fn seed(&self, symbol: impl Into<Symbol>) -> bool {
        let mut state = self.state.write();
        let state = &mut *state;
        let symbol = symbol.into();
        if state.entries.contains_key(&symbol) {
            return false;
        }
        state.entries.insert(symbol, state.follow_all.clone());
        true
    }

    /// Mark a subscriber as following every current and future symbol.
    ///
    /// The subscriber is appended to every existing entry and copied into
    /// every entry seeded afterwards, atomically with respect to [`Self::seed`].
    /// Returns the number of entries it was appended to.
    pub fn follow_all(&self, subscriber: SubscriberId) -> usize {
        let mut state = self.state.write();
        if !state.follow_all.contains(&subscriber) {
            state.follow_all.push(subscriber);
        }
        let mut appended = 0;
        for entry in state.entries.values_mut() {
            if !entry.contains(&subscriber) {
                entry.push(subscriber);
                appended += 1;
            }
        }
        appended
    }

    /// Clear the subscribe-all mark for a subscriber.
    ///
    /// Existing entries are untouched; use [`Self::remove_everywhere`].
    pub fn unfollow_all(&self, subscriber: SubscriberId) -> bool {
        let mut state = self.state.write();
        let before = state.follow_all.len();
        state.follow_all.retain(|id| *id != subscriber);
        state.follow_all.len() != before
    }

    /// Whether a subscriber follows every symbol.
    #[must_use]
    pub fn follows_all(&self, subscriber: SubscriberId) -> bool {
        self.state.read().follow_all.contains(&subscriber)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            symbols: state.entries.len(),
            subscriptions: state.entries.values().map(Vec::len).sum(),
            follow_all: state.follow_all.len(),
        }
    }
}
