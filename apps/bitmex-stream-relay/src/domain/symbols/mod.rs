//! Known Symbol Set
//!
//! Append-only, deduplicated list of tradable symbols observed from the
//! instrument catalog. Symbols are never removed within a process lifetime.

use std::collections::HashSet;

use parking_lot::RwLock;

/// A tradable instrument identifier (e.g. `XBTUSD`).
pub type Symbol = String;

#[derive(Debug, Default)]
struct SymbolSetState {
    ordered: Vec<Symbol>,
    seen: HashSet<Symbol>,
}

/// Concurrent, ordered, append-only set of known symbols.
#[derive(Debug, Default)]
pub struct SymbolSet {
    state: RwLock<SymbolSetState>,
}

impl SymbolSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge symbols into the set.
    ///
    /// Returns the symbols that were not known before, in first-seen order.
    pub fn merge<I>(&self, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = Symbol>,
    {
        let mut state = self.state.write();
        let mut added = Vec::new();

        for symbol in symbols {
            if symbol.is_empty() || state.seen.contains(&symbol) {
                continue;
            }
            state.seen.insert(symbol.clone());
            state.ordered.push(symbol.clone());
            added.push(symbol);
        }

        added
    }

    /// Copy of the known symbols in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.state.read().ordered.clone()
    }

    /// Whether the symbol has been observed.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().seen.contains(symbol)
    }

    /// Number of known symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ordered.len()
    }

    /// Whether no symbol is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn merge_reports_only_new_symbols() {
        let set = SymbolSet::new();

        let added = set.merge(symbols(&["XBTUSD", "ETHUSD"]));
        assert_eq!(added, symbols(&["XBTUSD", "ETHUSD"]));

        let added = set.merge(symbols(&["ETHUSD", "SOLUSD"]));
        assert_eq!(added, symbols(&["SOLUSD"]));
        assert_eq!(set.snapshot(), symbols(&["XBTUSD", "ETHUSD", "SOLUSD"]));
    }

    #[test]
    fn merge_dedups_within_one_batch() {
        let set = SymbolSet::new();

        let added = set.merge(symbols(&["XBTUSD", "XBTUSD", "", "ETHUSD"]));

        assert_eq!(added, symbols(&["XBTUSD", "ETHUSD"]));
        assert_eq!(set.len(), 2);
        assert!(set.contains("XBTUSD"));
        assert!(!set.contains(""));
    }

    #[test]
    fn empty_set() {
        let set = SymbolSet::new();
        assert!(set.is_empty());
        assert!(set.snapshot().is_empty());
    }
}
