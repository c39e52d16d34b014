//! Ticker Registry
//!
//! The authoritative set of ticker symbols currently requested by clients.
//!
//! # Design
//!
//! The registry only tracks membership. It does not start or stop anything
//! itself; the ticker service reacts to each mutation by asking the watcher
//! supervisor to start or stop the matching watcher.
//!
//! Readers (listing, supervisor checks) may run concurrently with writers and
//! always observe a whole snapshot, never a half-applied mutation.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::domain::ticker::TickerSymbol;

// =============================================================================
// Ticker Registry
// =============================================================================

/// Thread-safe, sorted, de-duplicated set of requested tickers.
///
/// # Example
///
/// ```rust
/// use ticker_watch::domain::registry::TickerRegistry;
/// use ticker_watch::domain::ticker::TickerSymbol;
///
/// let registry = TickerRegistry::new();
///
/// registry.add(TickerSymbol::parse("ethusdt").unwrap());
/// let tickers = registry.add(TickerSymbol::parse("btcusdt").unwrap());
/// assert_eq!(tickers[0].as_str(), "BTCUSDT");
/// assert_eq!(tickers[1].as_str(), "ETHUSDT");
///
/// // Removing an unknown ticker is a no-op
/// let tickers = registry.remove(&TickerSymbol::parse("solusdt").unwrap());
/// assert_eq!(tickers.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct TickerRegistry {
    tickers: RwLock<BTreeSet<TickerSymbol>>,
}

impl TickerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a ticker if absent.
    ///
    /// Returns the full sorted set after the insert.
    pub fn add(&self, ticker: TickerSymbol) -> Vec<TickerSymbol> {
        let mut tickers = self.tickers.write();
        tickers.insert(ticker);
        tickers.iter().cloned().collect()
    }

    /// Delete a ticker if present.
    ///
    /// Returns the full sorted set after the delete.
    pub fn remove(&self, ticker: &TickerSymbol) -> Vec<TickerSymbol> {
        let mut tickers = self.tickers.write();
        tickers.remove(ticker);
        tickers.iter().cloned().collect()
    }

    /// Sorted snapshot of all requested tickers.
    #[must_use]
    pub fn list(&self) -> Vec<TickerSymbol> {
        self.tickers.read().iter().cloned().collect()
    }

    /// Check whether a ticker is currently requested.
    #[must_use]
    pub fn contains(&self, ticker: &TickerSymbol) -> bool {
        self.tickers.read().contains(ticker)
    }

    /// Number of requested tickers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickers.read().len()
    }

    /// Whether no tickers are requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickers.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
