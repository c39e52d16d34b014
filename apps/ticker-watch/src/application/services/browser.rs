//! Shared Browser Session
//!
//! One automation session is shared by every watcher. It is launched when
//! the first page is requested and closed as soon as the last page is
//! released. Launch and close are serialized by one async mutex, so a close
//! never races a launch.
//!
//! A session that watchers report dead is dropped while its pages are still
//! counted. The next page request launches a replacement, and the stale pages
//! are released by their holders as they move over.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use super::backoff::{BackoffConfig, BackoffPolicy};
use crate::application::ports::{
    AutomationError, PageHandle, SessionHandle, SharedAutomationDriver,
};
use crate::domain::ticker::TickerSymbol;
use crate::infrastructure::metrics;

#[derive(Debug, Default)]
struct BrowserState {
    session: Option<SessionHandle>,
    /// Pages open or being opened.
    pages: usize,
}

/// Point-in-time view of the shared browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrowserStatus {
    /// Whether a session is running.
    pub live: bool,
    /// Pages open or being opened.
    pub open_pages: usize,
    /// Whether the most recent launch sequence failed.
    pub last_launch_failed: bool,
}

/// Reference-counted owner of the shared automation session.
pub struct BrowserPool {
    driver: SharedAutomationDriver,
    backoff: BackoffConfig,
    state: Mutex<BrowserState>,
    live: AtomicBool,
    open_pages: AtomicUsize,
    last_launch_failed: AtomicBool,
}

impl BrowserPool {
    /// Create a pool with no session.
    #[must_use]
    pub fn new(driver: SharedAutomationDriver, backoff: BackoffConfig) -> Self {
        Self {
            driver,
            backoff,
            state: Mutex::new(BrowserState::default()),
            live: AtomicBool::new(false),
            open_pages: AtomicUsize::new(0),
            last_launch_failed: AtomicBool::new(false),
        }
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &SharedAutomationDriver {
        &self.driver
    }

    /// Open a page for `ticker`, launching the session if needed.
    ///
    /// # Errors
    ///
    /// Returns the launch error once retries are exhausted, or the driver's
    /// error if the page cannot be opened. Either way the page count is left
    /// unchanged and an idle session is closed again.
    pub async fn acquire_page(&self, ticker: &TickerSymbol) -> Result<PageHandle, AutomationError> {
        let session = {
            let mut state = self.state.lock().await;
            let session = match &state.session {
                Some(session) => session.clone(),
                None => {
                    let session = self.launch().await?;
                    state.session = Some(session.clone());
                    session
                }
            };
            state.pages += 1;
            self.sync_gauges(&state);
            session
        };

        match self.driver.open_page(&session, ticker).await {
            Ok(page) => Ok(page),
            Err(e) => {
                self.release_slot().await;
                Err(e)
            }
        }
    }

    /// Close `page` and drop its reference on the session.
    pub async fn release_page(&self, page: &PageHandle) {
        if let Err(e) = self.driver.close_page(page).await {
            tracing::warn!(window = page.window(), error = %e, "Failed to close page");
        }
        self.release_slot().await;
    }

    /// Drop `dead` if it is still the current session.
    ///
    /// Pages on it stay counted until their holders release them. Returns
    /// `false` when another caller already replaced the session.
    pub async fn recycle_session(&self, dead: &SessionHandle) -> bool {
        let mut state = self.state.lock().await;
        if state.session.as_ref() != Some(dead) {
            return false;
        }
        if let Some(session) = state.session.take() {
            tracing::warn!(session = %session, pages = state.pages, "Dropping dead browser session");
            metrics::record_browser_recycled();
            self.close_session(session).await;
        }
        self.sync_gauges(&state);
        true
    }

    /// Close the session regardless of outstanding pages.
    ///
    /// Only valid once new watcher starts are refused: the page count is reset
    /// while stragglers still hold pages, and their later releases saturate at
    /// zero. The supervisor's shutdown is the only caller.
    pub(crate) async fn force_close(&self) {
        let mut state = self.state.lock().await;
        state.pages = 0;
        if let Some(session) = state.session.take() {
            self.close_session(session).await;
        }
        self.sync_gauges(&state);
    }

    /// Current browser status.
    #[must_use]
    pub fn status(&self) -> BrowserStatus {
        BrowserStatus {
            live: self.live.load(Ordering::Acquire),
            open_pages: self.open_pages.load(Ordering::Acquire),
            last_launch_failed: self.last_launch_failed.load(Ordering::Acquire),
        }
    }

    async fn release_slot(&self) {
        let mut state = self.state.lock().await;
        state.pages = state.pages.saturating_sub(1);
        if state.pages == 0
            && let Some(session) = state.session.take()
        {
            self.close_session(session).await;
        }
        self.sync_gauges(&state);
    }

    async fn launch(&self) -> Result<SessionHandle, AutomationError> {
        let mut policy = BackoffPolicy::new(self.backoff.clone());
        loop {
            match self.driver.create_session().await {
                Ok(session) => {
                    tracing::info!(session = %session, "Browser session launched");
                    self.last_launch_failed.store(false, Ordering::Release);
                    return Ok(session);
                }
                Err(e) => {
                    metrics::record_browser_launch_failure();
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(
                            error = %e,
                            attempts = policy.retries() + 1,
                            "Browser session launch failed"
                        );
                        self.last_launch_failed.store(true, Ordering::Release);
                        return Err(e);
                    };
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis(),
                        "Browser session launch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn close_session(&self, session: SessionHandle) {
        let id = session.to_string();
        match self.driver.close_session(session).await {
            Ok(()) => tracing::info!(session = %id, "Browser session closed"),
            Err(e) => tracing::warn!(session = %id, error = %e, "Failed to close browser session"),
        }
    }

    fn sync_gauges(&self, state: &BrowserState) {
        let live = state.session.is_some();
        self.live.store(live, Ordering::Release);
        self.open_pages.store(state.pages, Ordering::Release);
        metrics::set_browser_sessions(live);
        metrics::set_open_pages(state.pages);
    }
}

impl std::fmt::Debug for BrowserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
