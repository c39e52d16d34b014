//! Shared fixtures for integration tests.
//!
//! `ScriptedDriver` stands in for a real browser: each ticker has a script of
//! displayed prices (the last one repeats), and every session and page it
//! hands out is tracked so tests can assert on resource usage.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ticker_watch::{
    AutomationDriver, AutomationError, BackoffConfig, BrowserPool, PageHandle, PriceHub,
    PriceStream, PriceUpdate, SessionHandle, TickerRegistry, TickerService, TickerSymbol,
    WatcherConfig, WatcherSupervisor,
};
use tokio_stream::StreamExt;

// =============================================================================
// Scripted Driver
// =============================================================================

#[derive(Default)]
struct Script {
    values: Vec<String>,
    cursor: usize,
}

impl Script {
    fn current(&self) -> Option<String> {
        self.values
            .get(self.cursor.min(self.values.len().saturating_sub(1)))
            .cloned()
    }

    fn advance(&mut self) -> Option<String> {
        let value = self.current();
        if self.cursor + 1 < self.values.len() {
            self.cursor += 1;
        }
        value
    }
}

#[derive(Default)]
struct DriverState {
    scripts: HashMap<String, Script>,
    invalid: HashSet<String>,
    next_id: u64,
    sessions_created: usize,
    sessions_closed: usize,
    live_session: Option<String>,
    /// window -> (ticker, validated)
    pages: HashMap<String, (String, bool)>,
    open_calls: HashMap<String, usize>,
    max_open: HashMap<String, usize>,
}

impl DriverState {
    fn open_for(&self, ticker: &str) -> usize {
        self.pages.values().filter(|(t, _)| t == ticker).count()
    }
}

/// In-memory automation driver driven by per-ticker price scripts.
#[derive(Default)]
pub struct ScriptedDriver {
    state: Mutex<DriverState>,
    open_delay: Duration,
    close_delay: Duration,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display `values` for `ticker`, one per read; the last repeats.
    pub fn script(self, ticker: &str, values: &[&str]) -> Self {
        self.state.lock().scripts.insert(
            ticker.to_string(),
            Script {
                values: values.iter().map(|v| (*v).to_string()).collect(),
                cursor: 0,
            },
        );
        self
    }

    /// Pages for `ticker` never show a price.
    pub fn invalid(self, ticker: &str) -> Self {
        self.state.lock().invalid.insert(ticker.to_string());
        self
    }

    /// Delay every page open.
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Delay every page close.
    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().sessions_created
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().sessions_closed
    }

    pub fn session_live(&self) -> bool {
        self.state.lock().live_session.is_some()
    }

    pub fn open_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn open_pages_for(&self, ticker: &str) -> usize {
        self.state.lock().open_for(ticker)
    }

    pub fn open_calls(&self, ticker: &str) -> usize {
        self.state.lock().open_calls.get(ticker).copied().unwrap_or(0)
    }

    /// Kill the live session as a crashed browser would.
    pub fn crash_session(&self) {
        let mut state = self.state.lock();
        state.live_session = None;
        state.pages.clear();
    }

    /// Highest number of simultaneously open pages ever seen for `ticker`.
    pub fn max_open_pages_for(&self, ticker: &str) -> usize {
        self.state.lock().max_open.get(ticker).copied().unwrap_or(0)
    }
}

#[async_trait]
impl AutomationDriver for ScriptedDriver {
    async fn create_session(&self) -> Result<SessionHandle, AutomationError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.sessions_created += 1;
        let id = format!("session-{}", state.next_id);
        state.live_session = Some(id.clone());
        Ok(SessionHandle::new(id))
    }

    async fn close_session(&self, session: SessionHandle) -> Result<(), AutomationError> {
        let mut state = self.state.lock();
        if state.live_session.as_deref() == Some(session.id()) {
            state.live_session = None;
            state.pages.clear();
        }
        state.sessions_closed += 1;
        Ok(())
    }

    async fn open_page(
        &self,
        session: &SessionHandle,
        ticker: &TickerSymbol,
    ) -> Result<PageHandle, AutomationError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let mut state = self.state.lock();
        if state.live_session.as_deref() != Some(session.id()) {
            return Err(AutomationError::Session("invalid session id".to_string()));
        }
        state.next_id += 1;
        let window = format!("window-{}", state.next_id);
        let name = ticker.as_str().to_string();
        state.pages.insert(window.clone(), (name.clone(), false));
        *state.open_calls.entry(name.clone()).or_default() += 1;
        let open = state.open_for(&name);
        let max = state.max_open.entry(name).or_default();
        *max = (*max).max(open);
        Ok(PageHandle::new(session.clone(), window))
    }

    async fn read_text(
        &self,
        page: &PageHandle,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<String, AutomationError> {
        let mut state = self.state.lock();
        if state.live_session.as_deref() != Some(page.session().id()) {
            return Err(AutomationError::Session("invalid session id".to_string()));
        }
        let Some((ticker, validated)) = state.pages.get(page.window()).cloned() else {
            return Err(AutomationError::Page("no such window".to_string()));
        };
        if state.invalid.contains(&ticker) {
            return Err(AutomationError::Page("no such element".to_string()));
        }
        let script = state.scripts.entry(ticker.clone()).or_default();
        // The first read on a page is the start-up validation; it must not
        // consume a scripted value.
        let value = if validated {
            script.advance()
        } else {
            script.current()
        };
        if let Some(entry) = state.pages.get_mut(page.window()) {
            entry.1 = true;
        }
        value.ok_or_else(|| AutomationError::Page("no such element".to_string()))
    }

    async fn close_page(&self, page: &PageHandle) -> Result<(), AutomationError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.state.lock().pages.remove(page.window());
        Ok(())
    }
}

// =============================================================================
// Service Harness
// =============================================================================

/// Fully wired service over a scripted driver.
pub struct Harness {
    pub driver: Arc<ScriptedDriver>,
    pub browser: Arc<BrowserPool>,
    pub hub: Arc<PriceHub>,
    pub service: TickerService,
}

impl Harness {
    pub fn supervisor(&self) -> &WatcherSupervisor {
        self.service.supervisor()
    }
}

/// Watcher timings short enough for tests.
pub fn fast_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(10),
        read_timeout: Duration::from_millis(200),
        validation_timeout: Duration::from_millis(200),
        restart_wait_timeout: Duration::from_secs(2),
        failure_warn_threshold: 3,
        price_selector: ".price".to_string(),
    }
}

pub fn harness(driver: ScriptedDriver) -> Harness {
    harness_with(driver, fast_config())
}

pub fn harness_with(driver: ScriptedDriver, config: WatcherConfig) -> Harness {
    let driver = Arc::new(driver);
    let browser = Arc::new(BrowserPool::new(
        driver.clone(),
        BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..BackoffConfig::default()
        },
    ));
    let hub = Arc::new(PriceHub::with_capacity(64));
    let registry = Arc::new(TickerRegistry::new());
    let supervisor = WatcherSupervisor::new(
        registry.clone(),
        browser.clone(),
        hub.clone(),
        config,
    );
    let service = TickerService::new(registry, supervisor, hub.clone());

    Harness {
        driver,
        browser,
        hub,
        service,
    }
}

pub fn sym(raw: &str) -> TickerSymbol {
    TickerSymbol::parse(raw).unwrap()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next update on `stream`, failing the test after two seconds.
pub async fn next_update(stream: &mut PriceStream) -> PriceUpdate {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for a price update")
        .expect("price streams never end")
}

/// Assert nothing arrives on `stream` for `quiet`.
pub async fn assert_quiet(stream: &mut PriceStream, quiet: Duration) {
    if let Ok(Some(update)) = tokio::time::timeout(quiet, stream.next()).await {
        panic!("unexpected update {update:?}");
    }
}
