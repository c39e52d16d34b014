//! Ticker Watch Binary
//!
//! Starts the ticker watch service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-watch
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `WEBDRIVER_URL`: WebDriver endpoint (default: <http://localhost:4444>)
//! - `WEBDRIVER_BROWSER`: chrome | firefox (default: chrome)
//! - `WEBDRIVER_HEADLESS`: Run the browser headless (default: true)
//! - `TICKER_WATCH_API_PORT`: Client API port (default: 8080)
//! - `TICKER_WATCH_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `TICKER_WATCH_ALLOWED_ORIGIN`: CORS origin for the API
//! - `TICKER_WATCH_PAGE_URL_TEMPLATE`: Quote page URL containing `{ticker}`
//! - `TICKER_WATCH_PRICE_SELECTOR`: CSS selector of the displayed price
//! - `TICKER_WATCH_POLL_INTERVAL_MS`: Delay between price reads (default: 2000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use ticker_watch::infrastructure::telemetry;
use ticker_watch::{
    ApiServer, ApiState, BackoffConfig, BrowserPool, HealthServer, HealthServerState, PriceHub,
    TickerRegistry, TickerService, WatchConfig, WatcherConfig, WatcherSupervisor, WebDriverClient,
    WebDriverConfig, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(span_export = telemetry_guard.exporting(), "Starting Ticker Watch");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = WatchConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Browser automation
    let driver = WebDriverClient::new(WebDriverConfig::from_settings(
        &config.webdriver,
        &config.scrape,
    ))
    .context("failed to build WebDriver client")?;
    let browser = Arc::new(BrowserPool::new(
        Arc::new(driver),
        BackoffConfig::from(&config.browser),
    ));

    // Price fan-out
    let price_hub = Arc::new(PriceHub::new(&config.broadcast));

    // Watcher supervision
    let registry = Arc::new(TickerRegistry::new());
    let supervisor = WatcherSupervisor::new(
        Arc::clone(&registry),
        browser,
        price_hub.clone(),
        WatcherConfig::from_settings(&config.watcher, &config.scrape),
    );
    let service = TickerService::new(registry, supervisor.clone(), price_hub.clone());

    // Client API server
    let api_state = Arc::new(
        ApiState::new(service.clone(), &config.server.allowed_origin)
            .context("invalid API settings")?,
    );
    let api_server = ApiServer::new(config.server.api_port, api_state, shutdown_token.clone());

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        service,
        Arc::clone(&price_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Ticker watch ready");

    await_shutdown(shutdown_token).await;

    if !supervisor.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::warn!("Some watchers were still running at shutdown");
    }
    // Open price streams keep the API server's graceful shutdown waiting.
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, async { tokio::join!(api_task, health_task) })
        .await
        .is_err()
    {
        tracing::warn!("HTTP servers did not drain in time");
    }

    tracing::info!("Ticker watch stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &WatchConfig) {
    tracing::info!(
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        webdriver = %config.webdriver.endpoint,
        browser = config.webdriver.browser.as_str(),
        headless = config.webdriver.headless,
        poll_interval_ms = u64::try_from(config.watcher.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        page_url_template = %config.scrape.page_url_template,
        price_selector = %config.scrape.price_selector,
        "Scrape target"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
