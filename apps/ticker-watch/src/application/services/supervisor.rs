//! Watcher Supervisor
//!
//! Starts, locates, and stops watchers. The slot table is the single place
//! where "is a watcher alive for this ticker" is decided; every
//! check-then-act on it happens under one lock that is never held across an
//! await.
//!
//! # Lifecycle
//!
//! ```text
//! ensure_watcher ──► Starting ──validate──► Running ──mark_for_stop──► Stopping
//!                        │                                              │
//!                        └──reject──► Absent ◄──────loop exits──────────┘
//! ```
//!
//! A restart for a ticker whose watcher is still `Stopping` waits for that
//! instance to reach `Absent` before claiming a new slot, so two pages for
//! the same ticker never coexist.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::browser::BrowserPool;
use super::watcher::{Watcher, WatcherConfig, read_with_deadline};
use crate::application::ports::{PageHandle, SharedPriceBroadcast};
use crate::domain::registry::TickerRegistry;
use crate::domain::ticker::TickerSymbol;
use crate::domain::watcher::{WatcherState, WatcherStatus};
use crate::infrastructure::metrics::{self, StartOutcome};

/// First pause before retrying a restart that timed out.
const RESTART_RETRY_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// Outcomes
// =============================================================================

/// Result of an `ensure_watcher` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A watcher was already starting or running.
    AlreadyWatching,
    /// The ticker is no longer requested (or the supervisor is shutting down).
    NotRequested,
    /// The page could not be opened or validated.
    Rejected,
    /// A new watcher validated its page and started polling.
    Started,
}

/// Supervisor errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    /// The previous watcher did not stop in time. Retrying later is safe.
    #[error("previous watcher for {ticker} did not stop within {waited:?}")]
    RestartTimeout {
        /// Ticker being restarted.
        ticker: TickerSymbol,
        /// How long the restart waited.
        waited: Duration,
    },
}

// =============================================================================
// Supervisor
// =============================================================================

struct Slot {
    generation: u64,
    state: Arc<watch::Sender<WatcherState>>,
}

struct SupervisorShared {
    registry: Arc<TickerRegistry>,
    browser: Arc<BrowserPool>,
    prices: SharedPriceBroadcast,
    config: Arc<WatcherConfig>,
    watchers: Mutex<HashMap<TickerSymbol, Slot>>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

/// Owner of every watcher instance.
#[derive(Clone)]
pub struct WatcherSupervisor {
    shared: Arc<SupervisorShared>,
}

impl WatcherSupervisor {
    /// Create a supervisor with no watchers.
    #[must_use]
    pub fn new(
        registry: Arc<TickerRegistry>,
        browser: Arc<BrowserPool>,
        prices: SharedPriceBroadcast,
        config: WatcherConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                registry,
                browser,
                prices,
                config: Arc::new(config),
                watchers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// The shared browser.
    #[must_use]
    pub fn browser(&self) -> &Arc<BrowserPool> {
        &self.shared.browser
    }

    /// Make sure a watcher exists for `ticker` if it is still requested.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::RestartTimeout` if a stopping watcher for the
    /// same ticker does not finish within the restart wait budget.
    pub async fn ensure_watcher(
        &self,
        ticker: TickerSymbol,
    ) -> Result<EnsureOutcome, SupervisorError> {
        let budget = self.shared.config.restart_wait_timeout;
        let deadline = Instant::now() + budget;
        let mut wait_started: Option<Instant> = None;

        let (generation, state) = loop {
            let mut stopping = {
                let mut watchers = self.shared.watchers.lock();
                match watchers.get(&ticker).map(|slot| (*slot.state.borrow(), slot)) {
                    Some((WatcherState::Starting | WatcherState::Running, _)) => {
                        return Ok(EnsureOutcome::AlreadyWatching);
                    }
                    Some((WatcherState::Stopping, slot)) => slot.state.subscribe(),
                    Some((WatcherState::Absent, _)) => {
                        watchers.remove(&ticker);
                        continue;
                    }
                    None => {
                        if self.shared.shutting_down.load(Ordering::Acquire)
                            || !self.shared.registry.contains(&ticker)
                        {
                            return Ok(EnsureOutcome::NotRequested);
                        }
                        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let state = Arc::new(watch::Sender::new(WatcherState::Starting));
                        watchers.insert(
                            ticker.clone(),
                            Slot {
                                generation,
                                state: state.clone(),
                            },
                        );
                        publish_active_watchers(&watchers);
                        break (generation, state);
                    }
                }
            };

            let started = *wait_started.get_or_insert_with(Instant::now);
            tracing::debug!(ticker = %ticker, "Waiting for previous watcher to stop");
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, stopping.wait_for(|s| *s == WatcherState::Absent))
                .await
                .is_err()
            {
                metrics::record_watcher_start(StartOutcome::RestartTimeout);
                return Err(SupervisorError::RestartTimeout {
                    ticker,
                    waited: started.elapsed(),
                });
            }
        };

        if let Some(started) = wait_started {
            metrics::record_restart_wait(started.elapsed());
        }

        tracing::debug!(ticker = %ticker, generation, "Watcher starting");
        Ok(self.start(ticker, generation, state).await)
    }

    /// Ask the watcher for `ticker` to stop at its next iteration boundary.
    ///
    /// Returns `true` if a starting or running watcher was marked. Never
    /// closes resources itself.
    pub fn mark_for_stop(&self, ticker: &TickerSymbol) -> bool {
        let watchers = self.shared.watchers.lock();
        let marked = watchers
            .get(ticker)
            .is_some_and(|slot| mark_stopping(&slot.state));
        if marked {
            tracing::info!(ticker = %ticker, "Watcher marked for stop");
            publish_active_watchers(&watchers);
        }
        marked
    }

    /// Run `ensure_watcher` in the background, logging the outcome.
    ///
    /// A restart that times out is retried with backoff for as long as the
    /// ticker stays requested and the supervisor is not shutting down.
    pub fn spawn_ensure(&self, ticker: TickerSymbol) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut policy = BackoffPolicy::new(supervisor.restart_backoff());
            loop {
                match supervisor.ensure_watcher(ticker.clone()).await {
                    Ok(outcome) => {
                        tracing::debug!(ticker = %ticker, ?outcome, "Ensure watcher finished");
                        return;
                    }
                    Err(e) if !supervisor.wants(&ticker) => {
                        tracing::debug!(
                            ticker = %ticker,
                            error = %e,
                            "Watcher restart no longer needed"
                        );
                        return;
                    }
                    Err(e) => {
                        let delay = policy
                            .next_delay()
                            .unwrap_or(supervisor.shared.config.restart_wait_timeout);
                        tracing::warn!(
                            ticker = %ticker,
                            error = %e,
                            attempt = policy.retries(),
                            retry_in_ms = delay.as_millis(),
                            "Watcher restart timed out, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    /// Current state of the watcher for `ticker`.
    #[must_use]
    pub fn state(&self, ticker: &TickerSymbol) -> WatcherState {
        self.shared
            .watchers
            .lock()
            .get(ticker)
            .map_or(WatcherState::Absent, |slot| *slot.state.borrow())
    }

    /// Snapshot of every watcher, sorted by ticker.
    #[must_use]
    pub fn statuses(&self) -> Vec<WatcherStatus> {
        let mut statuses: Vec<WatcherStatus> = self
            .shared
            .watchers
            .lock()
            .iter()
            .map(|(ticker, slot)| WatcherStatus {
                ticker: ticker.clone(),
                state: *slot.state.borrow(),
                generation: slot.generation,
            })
            .collect();
        statuses.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        statuses
    }

    /// Stop every watcher and wait for them to release their pages.
    ///
    /// New starts are refused from this point on. Returns `false` if some
    /// watchers were still alive when `timeout` elapsed, in which case the
    /// browser session is closed anyway.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shared.shutting_down.store(true, Ordering::Release);

        let receivers: Vec<_> = {
            let watchers = self.shared.watchers.lock();
            watchers
                .values()
                .map(|slot| {
                    mark_stopping(&slot.state);
                    slot.state.subscribe()
                })
                .collect()
        };
        tracing::info!(watchers = receivers.len(), "Stopping all watchers");

        let all_absent = futures::future::join_all(receivers.into_iter().map(|mut rx| async move {
            // A dropped sender means the instance is gone as well.
            let _ = rx.wait_for(|s| *s == WatcherState::Absent).await;
        }));

        let stopped = tokio::time::timeout(timeout, all_absent).await.is_ok();
        if !stopped {
            tracing::warn!(?timeout, "Watchers did not stop in time, closing browser");
            self.shared.browser.force_close().await;
        }
        stopped
    }

    /// Whether `ticker` should have a watcher right now.
    fn wants(&self, ticker: &TickerSymbol) -> bool {
        !self.shared.shutting_down.load(Ordering::Acquire) && self.shared.registry.contains(ticker)
    }

    /// Pauses between restart attempts, capped at the restart wait budget.
    fn restart_backoff(&self) -> BackoffConfig {
        let budget = self.shared.config.restart_wait_timeout;
        BackoffConfig {
            initial_delay: RESTART_RETRY_DELAY.min(budget),
            max_delay: budget,
            max_attempts: u32::MAX,
            ..BackoffConfig::default()
        }
    }

    async fn start(
        &self,
        ticker: TickerSymbol,
        generation: u64,
        state: Arc<watch::Sender<WatcherState>>,
    ) -> EnsureOutcome {
        let shared = &self.shared;

        let page = match shared.browser.acquire_page(&ticker).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(ticker = %ticker, error = %e, "Could not open page");
                self.release_slot(&ticker, generation, &state);
                metrics::record_watcher_start(StartOutcome::Rejected);
                return EnsureOutcome::Rejected;
            }
        };

        if let Err(e) = read_with_deadline(
            shared.browser.driver(),
            &page,
            &shared.config.price_selector,
            shared.config.validation_timeout,
        )
        .await
        {
            tracing::warn!(ticker = %ticker, error = %e, "Invalid ticker, price not found");
            shared.browser.release_page(&page).await;
            self.release_slot(&ticker, generation, &state);
            metrics::record_watcher_start(StartOutcome::Rejected);
            return EnsureOutcome::Rejected;
        }

        // A stop that arrived during validation keeps the slot Stopping; the
        // loop below then exits on its first check.
        state.send_if_modified(|current| {
            if *current == WatcherState::Starting {
                *current = WatcherState::Running;
                true
            } else {
                false
            }
        });

        let watcher = Watcher::new(
            ticker.clone(),
            page,
            shared.browser.clone(),
            shared.prices.clone(),
            shared.config.clone(),
        );
        let receiver = state.subscribe();
        let supervisor = self.clone();
        tokio::spawn(async move {
            let page = watcher.run(receiver).await;
            supervisor.retire(&ticker, generation, &state, page).await;
        });

        metrics::record_watcher_start(StartOutcome::Started);
        EnsureOutcome::Started
    }

    async fn retire(
        &self,
        ticker: &TickerSymbol,
        generation: u64,
        state: &watch::Sender<WatcherState>,
        page: PageHandle,
    ) {
        self.shared.browser.release_page(&page).await;
        self.shared.prices.retire(ticker);
        self.release_slot(ticker, generation, state);
        tracing::info!(ticker = %ticker, generation, "Watcher stopped");
    }

    /// Drop the slot (if it still belongs to `generation`) and announce Absent.
    fn release_slot(
        &self,
        ticker: &TickerSymbol,
        generation: u64,
        state: &watch::Sender<WatcherState>,
    ) {
        let mut watchers = self.shared.watchers.lock();
        if watchers
            .get(ticker)
            .is_some_and(|slot| slot.generation == generation)
        {
            watchers.remove(ticker);
        }
        state.send_replace(WatcherState::Absent);
        publish_active_watchers(&watchers);
    }
}

impl std::fmt::Debug for WatcherSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherSupervisor")
            .field("watchers", &self.statuses())
            .finish_non_exhaustive()
    }
}

fn mark_stopping(state: &watch::Sender<WatcherState>) -> bool {
    state.send_if_modified(|current| {
        if current.is_live() {
            *current = WatcherState::Stopping;
            true
        } else {
            false
        }
    })
}

fn publish_active_watchers(watchers: &HashMap<TickerSymbol, Slot>) {
    let live = watchers
        .values()
        .filter(|slot| slot.state.borrow().is_live())
        .count();
    metrics::set_active_watchers(live);
}

// =============================================================================
// Tests
// =============================================================================
