//! WebDriver error types.

use thiserror::Error;

use crate::application::ports::AutomationError;

/// Errors from the WebDriver adapter.
#[derive(Debug, Error)]
pub enum WebDriverError {
    /// HTTP request could not be sent or its body not read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The driver answered with a W3C error object.
    #[error("WebDriver error: {error} - {message}")]
    Protocol {
        /// W3C error code (e.g. `no such window`).
        error: String,
        /// Human-readable message from the driver.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The HTTP client could not be built.
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl WebDriverError {
    /// Whether this is the W3C error `code`.
    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        matches!(self, Self::Protocol { error, .. } if error == code)
    }
}

impl From<reqwest::Error> for WebDriverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for WebDriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl From<WebDriverError> for AutomationError {
    fn from(err: WebDriverError) -> Self {
        match &err {
            WebDriverError::Protocol { error, .. }
                if matches!(
                    error.as_str(),
                    "invalid session id" | "session not created"
                ) =>
            {
                Self::Session(err.to_string())
            }
            WebDriverError::Protocol { .. } => Self::Page(err.to_string()),
            WebDriverError::Http(_)
            | WebDriverError::InvalidResponse(_)
            | WebDriverError::Setup(_) => Self::Transport(err.to_string()),
        }
    }
}
