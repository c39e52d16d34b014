//! Ticker Watch Configuration Settings
//!
//! Configuration types for the service, loaded from environment variables.
//! Unparseable numeric values fall back to their defaults; values that would
//! leave the service unable to work at all are rejected with `ConfigError`.

use std::str::FromStr;
use std::time::Duration;

/// Default page opened for each ticker.
const DEFAULT_PAGE_URL_TEMPLATE: &str =
    "https://www.tradingview.com/symbols/{ticker}/?exchange=BINANCE";

/// Default DOM location of the displayed price.
const DEFAULT_PRICE_SELECTOR: &str = "span.js-symbol-last";

/// Placeholder substituted with the ticker in the page template.
pub(crate) const TICKER_PLACEHOLDER: &str = "{ticker}";

/// Browser driven through WebDriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowserKind {
    /// Chrome or Chromium via chromedriver.
    #[default]
    Chrome,
    /// Firefox via geckodriver.
    Firefox,
}

impl BrowserKind {
    /// Parse browser kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "firefox" | "gecko" => Self::Firefox,
            _ => Self::Chrome,
        }
    }

    /// WebDriver `browserName` capability.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Client API port.
    pub api_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Origin allowed by CORS on the client API.
    pub allowed_origin: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            health_port: 8082,
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// WebDriver endpoint settings.
#[derive(Debug, Clone)]
pub struct WebDriverSettings {
    /// Base URL of the WebDriver server.
    pub endpoint: String,
    /// Browser to request.
    pub browser: BrowserKind,
    /// Whether to run the browser without a window.
    pub headless: bool,
    /// Budget for page navigation.
    pub navigation_timeout: Duration,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4444".to_string(),
            browser: BrowserKind::Chrome,
            headless: true,
            navigation_timeout: Duration::from_secs(15),
        }
    }
}

/// Where prices are scraped from.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Page URL template; `{ticker}` is replaced by the symbol.
    pub page_url_template: String,
    /// CSS selector of the price element.
    pub price_selector: String,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            page_url_template: DEFAULT_PAGE_URL_TEMPLATE.to_string(),
            price_selector: DEFAULT_PRICE_SELECTOR.to_string(),
        }
    }
}

/// Watcher timing settings.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Pause between price reads.
    pub poll_interval: Duration,
    /// Budget for a single price read.
    pub read_timeout: Duration,
    /// Budget for the first read that validates a new page.
    pub validation_timeout: Duration,
    /// How long a restart waits for the previous watcher to stop.
    pub restart_wait_timeout: Duration,
    /// Consecutive read failures before a persistent-failure warning.
    pub failure_warn_threshold: u32,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            read_timeout: Duration::from_secs(15),
            validation_timeout: Duration::from_secs(5),
            restart_wait_timeout: Duration::from_secs(30),
            failure_warn_threshold: 5,
        }
    }
}

/// Browser session launch settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Pause before the first launch retry.
    pub launch_delay_initial: Duration,
    /// Upper bound for launch retry pauses.
    pub launch_delay_max: Duration,
    /// Launch attempts before a start is rejected.
    pub launch_max_attempts: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            launch_delay_initial: Duration::from_millis(500),
            launch_delay_max: Duration::from_secs(10),
            launch_max_attempts: 3,
        }
    }
}

/// Price fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Per-ticker channel capacity (per receiver buffer).
    pub price_channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            price_channel_capacity: 64,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// WebDriver endpoint settings.
    pub webdriver: WebDriverSettings,
    /// Scrape target settings.
    pub scrape: ScrapeSettings,
    /// Watcher timing settings.
    pub watcher: WatcherSettings,
    /// Browser launch settings.
    pub browser: BrowserSettings,
    /// Price fan-out settings.
    pub broadcast: BroadcastSettings,
}

impl WatchConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a structural value is empty or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a structural value is empty or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(&lookup);

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            api_port: env.parse_or("TICKER_WATCH_API_PORT", server_defaults.api_port),
            health_port: env.parse_or("TICKER_WATCH_HEALTH_PORT", server_defaults.health_port),
            allowed_origin: env.required_or(
                "TICKER_WATCH_ALLOWED_ORIGIN",
                server_defaults.allowed_origin,
            )?,
        };

        let webdriver_defaults = WebDriverSettings::default();
        let webdriver = WebDriverSettings {
            endpoint: env
                .required_or("WEBDRIVER_URL", webdriver_defaults.endpoint)?
                .trim_end_matches('/')
                .to_string(),
            browser: env
                .get("WEBDRIVER_BROWSER")
                .map_or(webdriver_defaults.browser, |s| {
                    BrowserKind::from_str_case_insensitive(&s)
                }),
            headless: env
                .get("WEBDRIVER_HEADLESS")
                .map_or(webdriver_defaults.headless, |s| parse_bool(&s, true)),
            navigation_timeout: env.millis_or(
                "TICKER_WATCH_NAVIGATION_TIMEOUT_MS",
                webdriver_defaults.navigation_timeout,
            ),
        };

        let scrape_defaults = ScrapeSettings::default();
        let scrape = ScrapeSettings {
            page_url_template: env.required_or(
                "TICKER_WATCH_PAGE_URL_TEMPLATE",
                scrape_defaults.page_url_template,
            )?,
            price_selector: env.required_or(
                "TICKER_WATCH_PRICE_SELECTOR",
                scrape_defaults.price_selector,
            )?,
        };
        if !scrape.page_url_template.contains(TICKER_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_WATCH_PAGE_URL_TEMPLATE".to_string(),
                reason: format!("template must contain {TICKER_PLACEHOLDER}"),
            });
        }

        let watcher_defaults = WatcherSettings::default();
        let watcher = WatcherSettings {
            poll_interval: env.millis_or(
                "TICKER_WATCH_POLL_INTERVAL_MS",
                watcher_defaults.poll_interval,
            ),
            read_timeout: env.millis_or(
                "TICKER_WATCH_READ_TIMEOUT_MS",
                watcher_defaults.read_timeout,
            ),
            validation_timeout: env.millis_or(
                "TICKER_WATCH_VALIDATION_TIMEOUT_MS",
                watcher_defaults.validation_timeout,
            ),
            restart_wait_timeout: env.millis_or(
                "TICKER_WATCH_RESTART_WAIT_TIMEOUT_MS",
                watcher_defaults.restart_wait_timeout,
            ),
            failure_warn_threshold: env.parse_or(
                "TICKER_WATCH_FAILURE_WARN_THRESHOLD",
                watcher_defaults.failure_warn_threshold,
            ),
        };

        let browser_defaults = BrowserSettings::default();
        let browser = BrowserSettings {
            launch_delay_initial: env.millis_or(
                "TICKER_WATCH_LAUNCH_DELAY_INITIAL_MS",
                browser_defaults.launch_delay_initial,
            ),
            launch_delay_max: env.millis_or(
                "TICKER_WATCH_LAUNCH_DELAY_MAX_MS",
                browser_defaults.launch_delay_max,
            ),
            launch_max_attempts: env.parse_or(
                "TICKER_WATCH_LAUNCH_MAX_ATTEMPTS",
                browser_defaults.launch_max_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            price_channel_capacity: env
                .parse_or(
                    "TICKER_WATCH_PRICE_CHANNEL_CAPACITY",
                    BroadcastSettings::default().price_channel_capacity,
                )
                .max(1),
        };

        Ok(Self {
            server,
            webdriver,
            scrape,
            watcher,
            browser,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value the service cannot use.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

// =============================================================================
// Lookup Helpers
// =============================================================================

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn required_or(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v.trim().to_string()),
        }
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
