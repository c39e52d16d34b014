//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AutomationDriver`: headless-browser automation (sessions, pages, DOM reads)
//! - `PriceBroadcast`: fan-out of price updates to streaming subscribers

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::domain::ticker::{PriceUpdate, TickerSymbol};

// =============================================================================
// Handles
// =============================================================================

/// Opaque handle to one running automation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Wrap a driver-assigned session id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Driver-assigned session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to one page opened inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle {
    session: SessionHandle,
    window: String,
}

impl PageHandle {
    /// Create a page handle for a window of `session`.
    #[must_use]
    pub fn new(session: SessionHandle, window: impl Into<String>) -> Self {
        Self {
            session,
            window: window.into(),
        }
    }

    /// Session that owns the page.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Driver-assigned window id.
    #[must_use]
    pub fn window(&self) -> &str {
        &self.window
    }
}

// =============================================================================
// Automation Driver
// =============================================================================

/// Errors reported by an automation driver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AutomationError {
    /// Operation did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Elapsed budget.
        after: Duration,
    },
    /// Session could not be created or is gone.
    #[error("session error: {0}")]
    Session(String),
    /// Page-level failure (navigation, missing element, closed window).
    #[error("page error: {0}")]
    Page(String),
    /// Transport failure talking to the driver.
    #[error("transport error: {0}")]
    Transport(String),
}

impl AutomationError {
    /// Short reason label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Session(_) => "session",
            Self::Page(_) => "page",
            Self::Transport(_) => "transport",
        }
    }
}

/// Headless-browser automation collaborator.
///
/// Pages belong to a session; the caller owns the session lifecycle and
/// must close every page before closing its session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Launch a new automation session.
    async fn create_session(&self) -> Result<SessionHandle, AutomationError>;

    /// Close a session and every page it still holds.
    async fn close_session(&self, session: SessionHandle) -> Result<(), AutomationError>;

    /// Open a page for `ticker` inside `session` and navigate to it.
    async fn open_page(
        &self,
        session: &SessionHandle,
        ticker: &TickerSymbol,
    ) -> Result<PageHandle, AutomationError>;

    /// Read the text content at `selector`, waiting at most `timeout`.
    async fn read_text(
        &self,
        page: &PageHandle,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, AutomationError>;

    /// Close a page. Closing an already closed page succeeds.
    async fn close_page(&self, page: &PageHandle) -> Result<(), AutomationError>;
}

/// Shared automation driver.
pub type SharedAutomationDriver = Arc<dyn AutomationDriver>;

// =============================================================================
// Price Broadcast
// =============================================================================

/// Infinite sequence of price updates for one subscription.
pub type PriceStream = Pin<Box<dyn Stream<Item = PriceUpdate> + Send>>;

/// Fan-out of price updates to independent subscribers.
pub trait PriceBroadcast: Send + Sync {
    /// Publish an update. Returns the number of receivers reached.
    fn publish(&self, update: PriceUpdate) -> usize;

    /// Subscribe to `tickers` (every ticker when empty).
    fn subscribe(&self, tickers: &[TickerSymbol]) -> PriceStream;

    /// Note that the producer for `ticker` stopped.
    fn retire(&self, ticker: &TickerSymbol);
}

/// Shared price broadcast.
pub type SharedPriceBroadcast = Arc<dyn PriceBroadcast>;
