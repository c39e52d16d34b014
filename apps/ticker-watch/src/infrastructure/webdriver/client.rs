//! WebDriver HTTP client.
//!
//! Each ticker page is a browser tab inside one shared session. A W3C
//! session has a single current browsing context, so every
//! switch-then-act sequence runs under one per-client lock.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::WebDriverError;
use crate::application::ports::{AutomationDriver, AutomationError, PageHandle, SessionHandle};
use crate::domain::ticker::TickerSymbol;
use crate::infrastructure::config::{
    BrowserKind, ScrapeSettings, TICKER_PLACEHOLDER, WebDriverSettings,
};

/// W3C web element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Pause between attempts while waiting for an element.
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Budget for commands that do not carry their own timeout.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// WebDriver client configuration.
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL of the WebDriver server (no trailing slash).
    pub endpoint: String,
    /// Browser to request.
    pub browser: BrowserKind,
    /// Whether to run without a window.
    pub headless: bool,
    /// Budget for page navigation.
    pub navigation_timeout: Duration,
    /// Page URL template containing `{ticker}`.
    pub page_url_template: String,
}

impl WebDriverConfig {
    /// Build from the loaded settings.
    #[must_use]
    pub fn from_settings(webdriver: &WebDriverSettings, scrape: &ScrapeSettings) -> Self {
        Self {
            endpoint: webdriver.endpoint.clone(),
            browser: webdriver.browser,
            headless: webdriver.headless,
            navigation_timeout: webdriver.navigation_timeout,
            page_url_template: scrape.page_url_template.clone(),
        }
    }

    /// Page URL for `ticker`.
    #[must_use]
    pub fn page_url(&self, ticker: &TickerSymbol) -> String {
        self.page_url_template
            .replace(TICKER_PLACEHOLDER, &urlencoding::encode(ticker.as_str()))
    }

    /// New-session capabilities.
    #[must_use]
    pub fn capabilities(&self) -> Value {
        #[allow(clippy::cast_possible_truncation)]
        let page_load_ms = self.navigation_timeout.as_millis() as u64;

        let mut always_match = json!({
            "browserName": self.browser.as_str(),
            "pageLoadStrategy": "eager",
            "timeouts": { "pageLoad": page_load_ms },
        });

        let (key, args) = match self.browser {
            BrowserKind::Chrome => {
                let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage"];
                if self.headless {
                    args.extend(["--headless=new", "--disable-gpu"]);
                }
                ("goog:chromeOptions", args)
            }
            BrowserKind::Firefox => {
                let args = if self.headless { vec!["-headless"] } else { vec![] };
                ("moz:firefoxOptions", args)
            }
        };
        always_match[key] = json!({ "args": args });

        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct ErrorValue {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct NewWindow {
    handle: String,
}

// =============================================================================
// Client
// =============================================================================

/// W3C WebDriver client implementing the automation port.
#[derive(Debug)]
pub struct WebDriverClient {
    http: Client,
    config: WebDriverConfig,
    focus: Mutex<()>,
}

impl WebDriverClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `WebDriverError::Setup` if the HTTP client cannot be built.
    pub fn new(config: WebDriverConfig) -> Result<Self, WebDriverError> {
        let http = Client::builder()
            .timeout(COMMAND_TIMEOUT.max(config.navigation_timeout + Duration::from_secs(5)))
            .build()
            .map_err(|e| WebDriverError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            config,
            focus: Mutex::new(()),
        })
    }

    /// Send one command and unwrap the `{"value": ...}` envelope.
    async fn command<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, WebDriverError> {
        let url = format!("{}{path}", self.config.endpoint);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let envelope: Envelope<T> = serde_json::from_str(&text)?;
            return Ok(envelope.value);
        }

        match serde_json::from_str::<Envelope<ErrorValue>>(&text) {
            Ok(Envelope { value }) => Err(WebDriverError::Protocol {
                error: value.error,
                message: value.message,
            }),
            Err(_) => Err(WebDriverError::Http(format!("{status}: {text}"))),
        }
    }

    async fn switch_to(&self, page: &PageHandle) -> Result<(), WebDriverError> {
        let _: Value = self
            .command(
                Method::POST,
                &format!("/session/{}/window", page.session().id()),
                Some(json!({ "handle": page.window() })),
            )
            .await?;
        Ok(())
    }

    async fn close_window(&self, page: &PageHandle) -> Result<(), WebDriverError> {
        let _guard = self.focus.lock().await;

        match self.switch_to(page).await {
            Err(e) if e.is("no such window") => return Ok(()),
            other => other?,
        }

        match self
            .command::<Value>(
                Method::DELETE,
                &format!("/session/{}/window", page.session().id()),
                None,
            )
            .await
        {
            Err(e) if e.is("no such window") => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn navigate(&self, page: &PageHandle, url: &str) -> Result<(), WebDriverError> {
        let _guard = self.focus.lock().await;
        self.switch_to(page).await?;
        let _: Value = self
            .command(
                Method::POST,
                &format!("/session/{}/url", page.session().id()),
                Some(json!({ "url": url })),
            )
            .await?;
        Ok(())
    }

    /// One attempt at reading the first element matching `selector`.
    ///
    /// Returns `None` while the element is missing or still empty.
    async fn try_read(
        &self,
        page: &PageHandle,
        selector: &str,
    ) -> Result<Option<String>, WebDriverError> {
        let _guard = self.focus.lock().await;
        self.switch_to(page).await?;

        let session = page.session().id();
        let elements: Vec<serde_json::Map<String, Value>> = self
            .command(
                Method::POST,
                &format!("/session/{session}/elements"),
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;

        let Some(element_id) = elements.first().and_then(|element| {
            element
                .get(ELEMENT_KEY)
                .or_else(|| element.values().next())
                .and_then(Value::as_str)
                .map(str::to_string)
        }) else {
            return Ok(None);
        };

        let text: String = match self
            .command(
                Method::GET,
                &format!("/session/{session}/element/{element_id}/text"),
                None,
            )
            .await
        {
            Ok(text) => text,
            Err(e) if e.is("stale element reference") => return Ok(None),
            Err(e) => return Err(e),
        };

        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

#[async_trait]
impl AutomationDriver for WebDriverClient {
    async fn create_session(&self) -> Result<SessionHandle, AutomationError> {
        let session: NewSession = self
            .command(Method::POST, "/session", Some(self.config.capabilities()))
            .await?;
        tracing::debug!(session = %session.session_id, browser = self.config.browser.as_str(), "WebDriver session created");
        Ok(SessionHandle::new(session.session_id))
    }

    async fn close_session(&self, session: SessionHandle) -> Result<(), AutomationError> {
        match self
            .command::<Value>(Method::DELETE, &format!("/session/{}", session.id()), None)
            .await
        {
            Err(e) if e.is("invalid session id") => Ok(()),
            other => other.map(|_| ()).map_err(Into::into),
        }
    }

    async fn open_page(
        &self,
        session: &SessionHandle,
        ticker: &TickerSymbol,
    ) -> Result<PageHandle, AutomationError> {
        let window: NewWindow = self
            .command(
                Method::POST,
                &format!("/session/{}/window/new", session.id()),
                Some(json!({ "type": "tab" })),
            )
            .await?;
        let page = PageHandle::new(session.clone(), window.handle);
        let url = self.config.page_url(ticker);

        let navigation =
            tokio::time::timeout(self.config.navigation_timeout, self.navigate(&page, &url)).await;
        let result = match navigation {
            Ok(Ok(())) => return Ok(page),
            Ok(Err(e)) => AutomationError::from(e),
            Err(_) => AutomationError::Timeout {
                operation: "navigate",
                after: self.config.navigation_timeout,
            },
        };

        tracing::debug!(ticker = %ticker, url = %url, error = %result, "Navigation failed");
        if let Err(e) = self.close_window(&page).await {
            tracing::warn!(window = page.window(), error = %e, "Failed to close tab after navigation error");
        }
        Err(result)
    }

    async fn read_text(
        &self,
        page: &PageHandle,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(text) = self.try_read(page, selector).await? {
                return Ok(text);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AutomationError::Timeout {
                    operation: "read_text",
                    after: timeout,
                });
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn close_page(&self, page: &PageHandle) -> Result<(), AutomationError> {
        self.close_window(page).await.map_err(Into::into)
    }
}

// =============================================================================
// Tests
// =============================================================================
