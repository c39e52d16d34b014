#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::unreadable_literal
    )
)]

//! Ticker Watch - Browser-Scraped Price Multiplexer
//!
//! Keeps one browser page open per requested ticker, polls the displayed
//! price, and fans price changes out to any number of client streams.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `ticker`: Symbols, price parsing, update records
//!   - `registry`: The set of requested tickers
//!   - `watcher`: Watcher lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Browser automation and price broadcast interfaces
//!   - `services`: Browser pool, watcher loop, supervisor, client operations
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `webdriver`: W3C WebDriver client
//!   - `broadcast`: Per-ticker price channels with latest-value priming
//!   - `http`: Client API and SSE price stream
//!   - `health`: Health check and metrics endpoint
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────────┐      ┌─────────────┐      ┌──────────┐
//! POST /api/tickers ►│  Registry  │─────►│ Supervisor  │─────►│ Watchers │
//!                    └────────────┘      └─────────────┘      └────┬─────┘
//!                                              │ pages             │ prices
//!                                        ┌─────▼─────┐       ┌─────▼─────┐
//!                                        │  Browser  │       │ Price Hub │──► Client 1
//!                                        │  (1 sess) │       │           │──► Client N
//!                                        └───────────┘       └───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ticker types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::registry::TickerRegistry;
pub use domain::ticker::{PriceUpdate, SymbolError, TickerSymbol, parse_price};
pub use domain::watcher::{WatcherCounts, WatcherState, WatcherStatus};

// Ports
pub use application::ports::{
    AutomationDriver, AutomationError, PageHandle, PriceBroadcast, PriceStream, SessionHandle,
    SharedAutomationDriver, SharedPriceBroadcast,
};

// Services
pub use application::services::backoff::BackoffConfig;
pub use application::services::{
    BrowserPool, BrowserStatus, EnsureOutcome, SupervisorError, TickerService, WatcherConfig,
    WatcherSupervisor,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, BrowserKind, BrowserSettings, ConfigError, ScrapeSettings, ServerSettings,
    WatchConfig, WatcherSettings, WebDriverSettings,
};

// Price hub (for integration tests)
pub use infrastructure::broadcast::{PriceHub, PriceHubStats, SharedPriceHub};

// HTTP surfaces
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiServer, ApiServerError, ApiState, PriceEvent};

// WebDriver adapter
pub use infrastructure::webdriver::{WebDriverClient, WebDriverConfig, WebDriverError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
