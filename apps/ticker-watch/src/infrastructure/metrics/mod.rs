//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Prices**: Updates published and dropped for slow subscribers
//! - **Watchers**: Start outcomes, active count, read failures, restart waits
//! - **Browser**: Live sessions and open pages
//! - **Streams**: Active subscribers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this more than once returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_watch_price_updates_total",
        "Total price changes published by watchers"
    );
    describe_counter!(
        "ticker_watch_messages_dropped_total",
        "Total price updates skipped by lagging subscribers"
    );

    describe_counter!(
        "ticker_watch_watcher_starts_total",
        "Watcher start attempts by outcome"
    );
    describe_gauge!(
        "ticker_watch_active_watchers",
        "Number of watchers holding a page"
    );
    describe_counter!(
        "ticker_watch_read_failures_total",
        "Price reads that failed, by reason"
    );
    describe_histogram!(
        "ticker_watch_restart_wait_seconds",
        "Time a restart waited for the previous watcher to stop"
    );

    describe_gauge!(
        "ticker_watch_browser_sessions",
        "Number of live browser sessions (0 or 1)"
    );
    describe_gauge!(
        "ticker_watch_open_pages",
        "Number of pages open in the browser session"
    );
    describe_counter!(
        "ticker_watch_browser_launch_failures_total",
        "Browser session launch attempts that failed"
    );
    describe_counter!(
        "ticker_watch_browser_sessions_recycled_total",
        "Browser sessions dropped after watchers reported them dead"
    );

    describe_gauge!(
        "ticker_watch_stream_subscribers",
        "Number of active price stream subscriptions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for watcher start outcomes.
#[derive(Debug, Clone, Copy)]
pub enum StartOutcome {
    /// Watcher validated its page and started polling.
    Started,
    /// Page could not be opened or validated.
    Rejected,
    /// Restart gave up waiting for the previous watcher.
    RestartTimeout,
}

impl StartOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Rejected => "rejected",
            Self::RestartTimeout => "restart_timeout",
        }
    }
}

/// Record a price update published for a ticker.
pub fn record_price_update(ticker: &str) {
    counter!(
        "ticker_watch_price_updates_total",
        "ticker" => ticker.to_string()
    )
    .increment(1);
}

/// Record updates a lagging subscriber skipped.
pub fn record_messages_dropped(count: u64) {
    counter!("ticker_watch_messages_dropped_total").increment(count);
}

/// Record the outcome of a watcher start attempt.
pub fn record_watcher_start(outcome: StartOutcome) {
    counter!(
        "ticker_watch_watcher_starts_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the active watcher count.
pub fn set_active_watchers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ticker_watch_active_watchers").set(count as f64);
}

/// Record a failed price read.
pub fn record_read_failure(reason: &'static str) {
    counter!(
        "ticker_watch_read_failures_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record how long a restart waited for the previous watcher.
pub fn record_restart_wait(duration: Duration) {
    histogram!("ticker_watch_restart_wait_seconds").record(duration.as_secs_f64());
}

/// Update the browser session gauge.
pub fn set_browser_sessions(live: bool) {
    gauge!("ticker_watch_browser_sessions").set(if live { 1.0 } else { 0.0 });
}

/// Update the open page gauge.
pub fn set_open_pages(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ticker_watch_open_pages").set(count as f64);
}

/// Record a failed browser launch attempt.
pub fn record_browser_launch_failure() {
    counter!("ticker_watch_browser_launch_failures_total").increment(1);
}

/// Record a dead browser session being dropped.
pub fn record_browser_recycled() {
    counter!("ticker_watch_browser_sessions_recycled_total").increment(1);
}

/// Update the stream subscriber count.
pub fn set_stream_subscribers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ticker_watch_stream_subscribers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
