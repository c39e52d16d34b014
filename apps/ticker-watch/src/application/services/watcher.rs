//! Watcher Polling Loop
//!
//! A watcher owns one page for one ticker. While its state is `Running` it
//! reads the displayed price, publishes it when it differs from the last
//! published value, and sleeps until the next poll. The stop signal is only
//! checked between iterations, never in the middle of a read.
//!
//! Reads that keep failing because the browser session died make the watcher
//! drop that session and reopen its page on a fresh one.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;

use super::browser::BrowserPool;
use crate::application::ports::{
    AutomationError, PageHandle, SharedAutomationDriver, SharedPriceBroadcast,
};
use crate::domain::ticker::{PriceUpdate, TickerSymbol, parse_price};
use crate::domain::watcher::WatcherState;
use crate::infrastructure::config::{ScrapeSettings, WatcherSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Timing and scrape target shared by all watchers.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Pause between price reads.
    pub poll_interval: Duration,
    /// Budget for a single price read.
    pub read_timeout: Duration,
    /// Budget for the validation read of a new page.
    pub validation_timeout: Duration,
    /// How long a restart waits for the previous instance to stop.
    pub restart_wait_timeout: Duration,
    /// Consecutive read failures before a persistent-failure warning. A
    /// streak of this many session errors also replaces the session.
    pub failure_warn_threshold: u32,
    /// CSS selector of the price element.
    pub price_selector: String,
}

impl WatcherConfig {
    /// Build from the loaded settings.
    #[must_use]
    pub fn from_settings(watcher: &WatcherSettings, scrape: &ScrapeSettings) -> Self {
        Self {
            poll_interval: watcher.poll_interval,
            read_timeout: watcher.read_timeout,
            validation_timeout: watcher.validation_timeout,
            restart_wait_timeout: watcher.restart_wait_timeout,
            failure_warn_threshold: watcher.failure_warn_threshold,
            price_selector: scrape.price_selector.clone(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from_settings(&WatcherSettings::default(), &ScrapeSettings::default())
    }
}

/// Read `selector` from `page`, enforcing `timeout` even if the driver does not.
pub(crate) async fn read_with_deadline(
    driver: &SharedAutomationDriver,
    page: &PageHandle,
    selector: &str,
    timeout: Duration,
) -> Result<String, AutomationError> {
    tokio::time::timeout(timeout, driver.read_text(page, selector, timeout))
        .await
        .unwrap_or(Err(AutomationError::Timeout {
            operation: "read_text",
            after: timeout,
        }))
}

// =============================================================================
// Watcher
// =============================================================================

/// Result of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new price was published.
    Published(Decimal),
    /// The price equals the last published one.
    Unchanged,
    /// The text could not be parsed as a price.
    Unparseable,
    /// The read failed or timed out.
    ReadFailed,
}

/// Polling loop for one ticker instance.
pub struct Watcher {
    ticker: TickerSymbol,
    page: PageHandle,
    browser: Arc<BrowserPool>,
    prices: SharedPriceBroadcast,
    config: Arc<WatcherConfig>,
    last_price: Option<Decimal>,
    consecutive_failures: u32,
}

impl Watcher {
    /// Create a watcher over an already validated page.
    #[must_use]
    pub fn new(
        ticker: TickerSymbol,
        page: PageHandle,
        browser: Arc<BrowserPool>,
        prices: SharedPriceBroadcast,
        config: Arc<WatcherConfig>,
    ) -> Self {
        Self {
            ticker,
            page,
            browser,
            prices,
            config,
            last_price: None,
            consecutive_failures: 0,
        }
    }

    /// Last published price.
    #[must_use]
    pub const fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Current streak of failed reads.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Read the price once and publish it if it changed.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let text = match read_with_deadline(
            self.browser.driver(),
            &self.page,
            &self.config.price_selector,
            self.config.read_timeout,
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                self.record_failure(&e);
                let threshold = self.config.failure_warn_threshold.max(1);
                if matches!(e, AutomationError::Session(_))
                    && self.consecutive_failures % threshold == 0
                {
                    self.replace_page().await;
                }
                return PollOutcome::ReadFailed;
            }
        };

        if self.consecutive_failures >= self.config.failure_warn_threshold {
            tracing::info!(
                ticker = %self.ticker,
                failures = self.consecutive_failures,
                "Price reads recovered"
            );
        }
        self.consecutive_failures = 0;

        let Some(price) = parse_price(&text) else {
            tracing::debug!(ticker = %self.ticker, text = %text, "Discarding unparseable price");
            return PollOutcome::Unparseable;
        };

        if self.last_price == Some(price) {
            return PollOutcome::Unchanged;
        }

        self.last_price = Some(price);
        let receivers = self.prices.publish(PriceUpdate::now(self.ticker.clone(), price));
        metrics::record_price_update(self.ticker.as_str());
        tracing::debug!(ticker = %self.ticker, %price, receivers, "Price changed");

        PollOutcome::Published(price)
    }

    /// Poll until `state` leaves `Running`, then hand back the page.
    ///
    /// The sleep between polls ends early when the state changes. A dropped
    /// state sender is treated as a stop.
    pub async fn run(mut self, mut state: watch::Receiver<WatcherState>) -> PageHandle {
        tracing::info!(ticker = %self.ticker, "Watcher running");

        loop {
            if *state.borrow_and_update() != WatcherState::Running {
                break;
            }

            self.poll_once().await;

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(ticker = %self.ticker, "Watcher stopping");
        self.page
    }

    /// Reopen the page on a new session after the current one died.
    ///
    /// The old page stays held until the new one is open, so a failed reopen
    /// leaves the watcher exactly as it was.
    async fn replace_page(&mut self) {
        self.browser.recycle_session(self.page.session()).await;
        match self.browser.acquire_page(&self.ticker).await {
            Ok(page) => {
                let stale = std::mem::replace(&mut self.page, page);
                self.browser.release_page(&stale).await;
                tracing::info!(
                    ticker = %self.ticker,
                    session = %self.page.session(),
                    "Watcher moved to a new browser session"
                );
            }
            Err(e) => {
                tracing::warn!(ticker = %self.ticker, error = %e, "Could not reopen page");
            }
        }
    }

    fn record_failure(&mut self, error: &AutomationError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        metrics::record_read_failure(error.reason());

        if self.consecutive_failures == self.config.failure_warn_threshold {
            tracing::warn!(
                ticker = %self.ticker,
                failures = self.consecutive_failures,
                error = %error,
                "Price reads failing persistently"
            );
        } else {
            tracing::debug!(ticker = %self.ticker, error = %error, "Price read failed");
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("ticker", &self.ticker)
            .field("page", &self.page)
            .field("last_price", &self.last_price)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
