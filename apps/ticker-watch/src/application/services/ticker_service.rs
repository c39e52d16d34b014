//! Ticker Service
//!
//! The four client operations. Registry mutations drive watcher
//! reconciliation; streaming never starts or stops a watcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::supervisor::WatcherSupervisor;
use crate::application::ports::{PriceStream, SharedPriceBroadcast};
use crate::domain::registry::TickerRegistry;
use crate::domain::ticker::{SymbolError, TickerSymbol};

/// Client-facing facade over the registry, supervisor, and multiplexer.
#[derive(Clone)]
pub struct TickerService {
    registry: Arc<TickerRegistry>,
    supervisor: WatcherSupervisor,
    prices: SharedPriceBroadcast,
}

impl TickerService {
    /// Create the service.
    #[must_use]
    pub const fn new(
        registry: Arc<TickerRegistry>,
        supervisor: WatcherSupervisor,
        prices: SharedPriceBroadcast,
    ) -> Self {
        Self {
            registry,
            supervisor,
            prices,
        }
    }

    /// Request `raw` and start its watcher in the background.
    ///
    /// Returns the sorted set of requested tickers. The ticker stays listed
    /// even if its page later turns out to be invalid.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` if `raw` is blank. Any other text is
    /// accepted.
    pub fn add_ticker(&self, raw: &str) -> Result<Vec<TickerSymbol>, SymbolError> {
        let ticker = TickerSymbol::parse(raw)?;
        let tickers = self.registry.add(ticker.clone());
        tracing::info!(ticker = %ticker, total = tickers.len(), "Ticker added");
        self.supervisor.spawn_ensure(ticker);
        Ok(tickers)
    }

    /// Stop requesting `raw` and mark its watcher for stop.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` if `raw` is blank.
    pub fn remove_ticker(&self, raw: &str) -> Result<Vec<TickerSymbol>, SymbolError> {
        let ticker = TickerSymbol::parse(raw)?;
        // Registry first: a concurrent ensure that has not claimed its slot
        // yet then sees the ticker as unrequested.
        let tickers = self.registry.remove(&ticker);
        self.supervisor.mark_for_stop(&ticker);
        tracing::info!(ticker = %ticker, total = tickers.len(), "Ticker removed");
        Ok(tickers)
    }

    /// Sorted snapshot of requested tickers.
    #[must_use]
    pub fn list_tickers(&self) -> Vec<TickerSymbol> {
        self.registry.list()
    }

    /// Open an independent price stream for `raw_tickers`.
    ///
    /// Symbols are normalized and de-duplicated; an empty list streams every
    /// ticker. Streaming does not add tickers to the registry.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` if any symbol is blank.
    pub fn stream_prices<S: AsRef<str>>(
        &self,
        raw_tickers: &[S],
    ) -> Result<PriceStream, SymbolError> {
        let tickers: BTreeSet<TickerSymbol> = raw_tickers
            .iter()
            .map(|raw| TickerSymbol::parse(raw.as_ref()))
            .collect::<Result<_, _>>()?;
        let tickers: Vec<TickerSymbol> = tickers.into_iter().collect();

        tracing::debug!(tickers = ?tickers, "Price stream opened");
        Ok(self.prices.subscribe(&tickers))
    }

    /// The supervisor driving watchers.
    #[must_use]
    pub const fn supervisor(&self) -> &WatcherSupervisor {
        &self.supervisor
    }

    /// The ticker registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TickerRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for TickerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerService")
            .field("tickers", &self.registry.list())
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}
